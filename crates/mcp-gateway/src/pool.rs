//! Keyed cache of live backend sessions.
//!
//! Sessions are keyed by `backend:caller_session`. Creation happens outside
//! the lock; the insert is double-checked so a caller that loses a creation
//! race closes its own session and uses the winner. Long-lived sessions
//! survive `release` and are only closed by `close`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::catalog::BackendSpec;
use crate::error::{SessionError, TransportError};
use crate::transport::{BackendSession, ClientIdentity, SessionFactory};

pub fn session_key(backend: &str, caller_session: &str) -> String {
    format!("{backend}:{caller_session}")
}

struct PoolEntry {
    session: Arc<dyn BackendSession>,
    long_lived: bool,
    /// Outstanding acquires not yet released.
    leases: usize,
}

pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    identity: ClientIdentity,
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, identity: ClientIdentity) -> Self {
        Self {
            factory,
            identity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get the session for `(backend, caller_session)`, creating it on a miss.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        backend: &str,
        caller_session: &str,
        spec: &BackendSpec,
    ) -> Result<Arc<dyn BackendSession>, TransportError> {
        let key = session_key(backend, caller_session);

        if self.entries.read().await.contains_key(&key) {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&key) {
                entry.leases += 1;
                return Ok(entry.session.clone());
            }
        }

        let created = self
            .factory
            .create_session(cancel, &self.identity, spec, backend)
            .await
            .inspect_err(|e| tracing::error!("failed to create session {}: {}", key, e))?;

        let winner = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.leases += 1;
                    Some(entry.session.clone())
                }
                None => {
                    entries.insert(
                        key.clone(),
                        PoolEntry {
                            session: created.clone(),
                            long_lived: spec.long_lived,
                            leases: 1,
                        },
                    );
                    None
                }
            }
        };

        match winner {
            Some(existing) => {
                tracing::debug!("lost creation race for {}; closing duplicate", key);
                if let Err(e) = created.close().await {
                    tracing::warn!("closing duplicate session {} failed: {}", key, e);
                }
                Ok(existing)
            }
            None => {
                tracing::debug!("pooled new session {} (long_lived={})", key, spec.long_lived);
                Ok(created)
            }
        }
    }

    /// Drop one lease; the last release of a non-long-lived session closes it.
    pub async fn release(&self, backend: &str, caller_session: &str) -> Result<(), SessionError> {
        let key = session_key(backend, caller_session);
        let removed = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&key) else {
                return Ok(());
            };
            if entry.long_lived {
                return Ok(());
            }
            entry.leases = entry.leases.saturating_sub(1);
            if entry.leases > 0 {
                return Ok(());
            }
            entries.remove(&key)
        };
        match removed {
            Some(entry) => {
                tracing::debug!("closing released session {}", key);
                entry.session.close().await
            }
            None => Ok(()),
        }
    }

    /// Close every session, long-lived ones included. Returns the first error.
    pub async fn close(&self) -> Result<(), SessionError> {
        let drained: Vec<(String, PoolEntry)> = self.entries.write().await.drain().collect();
        tracing::info!("closing session pool (sessions={})", drained.len());
        let mut first_err = None;
        for (key, entry) in drained {
            if let Err(e) = entry.session.close().await {
                tracing::warn!("closing session {} failed: {}", key, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Acquire wrapped in a guard that releases on drop.
    pub async fn lease(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        backend: &str,
        caller_session: &str,
        spec: &BackendSpec,
    ) -> Result<Lease, TransportError> {
        let session = self.acquire(cancel, backend, caller_session, spec).await?;
        Ok(Lease {
            pool: Arc::clone(self),
            backend: backend.to_string(),
            caller_session: caller_session.to_string(),
            session,
            released: false,
        })
    }
}

/// A pooled session that is released when dropped.
pub struct Lease {
    pool: Arc<SessionPool>,
    backend: String,
    caller_session: String,
    session: Arc<dyn BackendSession>,
    released: bool,
}

impl Lease {
    pub fn session(&self) -> &dyn BackendSession {
        self.session.as_ref()
    }

    /// Release now and report the outcome.
    pub async fn release(mut self) -> Result<(), SessionError> {
        self.released = true;
        self.pool.release(&self.backend, &self.caller_session).await
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("lease for {} dropped outside a runtime", self.backend);
            return;
        };
        let pool = self.pool.clone();
        let backend = std::mem::take(&mut self.backend);
        let caller_session = std::mem::take(&mut self.caller_session);
        handle.spawn(async move {
            if let Err(e) = pool.release(&backend, &caller_session).await {
                tracing::warn!("release of {} failed: {}", backend, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeFactory;
    use std::time::Duration;

    fn pool_with(factory: Arc<FakeFactory>) -> Arc<SessionPool> {
        Arc::new(SessionPool::new(factory, ClientIdentity::default()))
    }

    fn spec(long_lived: bool) -> BackendSpec {
        BackendSpec {
            long_lived,
            ..BackendSpec::default()
        }
    }

    #[tokio::test]
    async fn same_key_returns_same_session() {
        let factory = Arc::new(FakeFactory::new().with_backend("svc", vec!["a"]));
        let pool = pool_with(factory.clone());
        let cancel = CancellationToken::new();

        let first = pool.acquire(&cancel, "svc", "s1", &spec(false)).await.expect("first");
        let second = pool.acquire(&cancel, "svc", "s1", &spec(false)).await.expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);

        let other = pool.acquire(&cancel, "svc", "s2", &spec(false)).await.expect("other");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn release_closes_after_last_lease() {
        let factory = Arc::new(FakeFactory::new().with_backend("svc", vec![]));
        let pool = pool_with(factory.clone());
        let cancel = CancellationToken::new();

        pool.acquire(&cancel, "svc", "s1", &spec(false)).await.expect("acquire");
        pool.acquire(&cancel, "svc", "s1", &spec(false)).await.expect("acquire");
        pool.release("svc", "s1").await.expect("release");
        assert_eq!(factory.sessions()[0].close_calls(), 0);
        pool.release("svc", "s1").await.expect("release");
        assert_eq!(factory.sessions()[0].close_calls(), 1);

        pool.acquire(&cancel, "svc", "s1", &spec(false)).await.expect("recreate");
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn long_lived_release_is_noop() {
        let factory = Arc::new(FakeFactory::new().with_backend("svc", vec![]));
        let pool = pool_with(factory.clone());
        let cancel = CancellationToken::new();

        let first = pool.acquire(&cancel, "svc", "s1", &spec(true)).await.expect("acquire");
        pool.release("svc", "s1").await.expect("release");
        pool.release("svc", "s1").await.expect("release again");
        let again = pool.acquire(&cancel, "svc", "s1", &spec(true)).await.expect("reacquire");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.sessions()[0].close_calls(), 0);

        pool.close().await.expect("close");
        assert_eq!(factory.sessions()[0].close_calls(), 1);
    }

    #[tokio::test]
    async fn racing_creators_keep_one_session() {
        let (factory, gate) = FakeFactory::new().with_backend("svc", vec![]).gated();
        let factory = Arc::new(factory);
        let pool = pool_with(factory.clone());

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                pool.acquire(&CancellationToken::new(), "svc", "s1", &spec(false))
                    .await
                    .expect("acquire")
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(2);

        let a = tasks.remove(0).await.expect("join");
        let b = tasks.remove(0).await.expect("join");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.created(), 2);
        let closed: usize = factory.sessions().iter().map(|s| s.close_calls()).sum();
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn creation_errors_surface_unchanged() {
        let factory = Arc::new(FakeFactory::new().failing("down"));
        let pool = pool_with(factory);
        let err = pool
            .acquire(&CancellationToken::new(), "down", "s1", &spec(false))
            .await
            .err()
            .expect("fails");
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn dropped_lease_releases() {
        let factory = Arc::new(FakeFactory::new().with_backend("svc", vec![]));
        let pool = pool_with(factory.clone());
        {
            let lease = pool
                .lease(&CancellationToken::new(), "svc", "s1", &spec(false))
                .await
                .expect("lease");
            assert!(lease.session().list_tools().await.expect("tools").is_empty());
        }
        tokio::time::timeout(Duration::from_secs(1), factory.sessions()[0].closed().cancelled())
            .await
            .expect("released on drop");

        let lease = pool
            .lease(&CancellationToken::new(), "svc", "s2", &spec(false))
            .await
            .expect("lease");
        lease.release().await.expect("explicit release");
        assert_eq!(factory.sessions()[1].close_calls(), 1);
    }
}
