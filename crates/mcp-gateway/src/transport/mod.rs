//! Turn a resolved backend descriptor into a live session.
//!
//! Each [`TransportKind`] has one strategy module. [`Transports`] dispatches
//! on the descriptor kind and binds non-long-lived sessions to the caller's
//! cancellation token.

pub mod container;
pub mod http_session;
pub mod remote;
pub mod session;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::catalog::{BackendKind, BackendSpec};
use crate::error::TransportError;

pub use session::{BackendSession, McpClientSession, close_on_cancel};

/// Transport strategy selected from the catalog `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Container,
    Source,
    Remote,
}

impl TransportKind {
    pub fn for_backend(kind: &BackendKind) -> Self {
        match kind {
            BackendKind::Remote => TransportKind::Remote,
            BackendKind::Source => TransportKind::Source,
            BackendKind::Container | BackendKind::Other(_) => TransportKind::Container,
        }
    }
}

/// Client identity presented to backends during initialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "mcp-gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Creates sessions for the pool.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        cancel: &CancellationToken,
        identity: &ClientIdentity,
        spec: &BackendSpec,
        backend: &str,
    ) -> Result<Arc<dyn BackendSession>, TransportError>;
}

/// Default factory dispatching over every [`TransportKind`].
#[derive(Debug, Clone)]
pub struct Transports {
    /// Parent directory for source-repository clones.
    pub clone_root: PathBuf,
}

impl Transports {
    pub fn new(clone_root: impl Into<PathBuf>) -> Self {
        Self {
            clone_root: clone_root.into(),
        }
    }

    async fn dispatch(
        &self,
        identity: &ClientIdentity,
        spec: &BackendSpec,
        backend: &str,
    ) -> Result<Arc<dyn BackendSession>, TransportError> {
        let kind = TransportKind::for_backend(&spec.kind);
        tracing::info!("creating {:?} session for {}", kind, backend);
        let session: Arc<dyn BackendSession> = match kind {
            TransportKind::Container => {
                Arc::new(container::create_session(identity, spec, backend).await?)
            }
            TransportKind::Source => {
                Arc::new(source::create_session(&self.clone_root, identity, spec, backend).await?)
            }
            TransportKind::Remote => remote::create_session(identity, spec, backend).await?,
        };
        Ok(session)
    }
}

#[async_trait]
impl SessionFactory for Transports {
    async fn create_session(
        &self,
        cancel: &CancellationToken,
        identity: &ClientIdentity,
        spec: &BackendSpec,
        backend: &str,
    ) -> Result<Arc<dyn BackendSession>, TransportError> {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TransportError::Connect {
                    server: backend.to_string(),
                    reason: "cancelled".to_string(),
                });
            }
            created = self.dispatch(identity, spec, backend) => created?,
        };
        if !spec.long_lived {
            close_on_cancel(session.clone(), backend.to_string(), cancel.clone());
        }
        Ok(session)
    }
}
