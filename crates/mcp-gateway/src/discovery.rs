//! Fan-out tool discovery across every configured backend.
//!
//! A pass plans its targets from the user configuration, then lists tools
//! from each backend concurrently with at most `concurrency` in flight. A
//! failing backend contributes no tools; the pass itself never fails.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::catalog::{BackendKind, BackendSpec, Catalog, EnvVar, INSTALL_COMMAND_ENV};
use crate::error::GatewayError;
use crate::instructions::InstructionMap;
use crate::merge::{UserConfig, UserConfigs};
use crate::pool::SessionPool;
use crate::registry::ToolRegistry;
use crate::transport::source::SOURCE_PREFIX;

/// Default bound on concurrent backend discoveries.
pub fn default_concurrency() -> usize {
    num_cpus::get() * 2
}

/// A backend to discover, with the descriptor snapshot to launch it from.
#[derive(Debug, Clone)]
pub struct DiscoveryTarget {
    pub backend: String,
    pub spec: Arc<BackendSpec>,
}

/// Build a source-repository descriptor from `installCmd`, `runCmd` and
/// `envs`. Declared env names take their values from the gateway process.
pub fn synthesize_source_spec(key: &str, config: &UserConfig) -> Option<BackendSpec> {
    let field = |name: &str| {
        config
            .get(name)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let Some(run_cmd) = field("runCmd") else {
        tracing::warn!("source backend {} has no runCmd; skipping", key);
        return None;
    };

    let mut env: Vec<EnvVar> = config
        .get("envs")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_str)
        .filter_map(|name| match std::env::var(name) {
            Ok(value) => Some(EnvVar::new(name, value)),
            Err(_) => {
                tracing::warn!("env {} declared by {} is not set", name, key);
                None
            }
        })
        .collect();
    if let Some(install) = field("installCmd") {
        env.push(EnvVar::new(INSTALL_COMMAND_ENV, install));
    }

    Some(BackendSpec {
        name: key.to_string(),
        kind: BackendKind::Source,
        command: vec![run_cmd.to_string()],
        env,
        long_lived: false,
        ..BackendSpec::default()
    })
}

/// Resolve every user config key into a discovery target, skipping misses.
pub fn plan_targets(
    catalog: &Catalog,
    instructions: &InstructionMap,
    user_configs: &UserConfigs,
) -> Vec<DiscoveryTarget> {
    let mut targets = Vec::new();
    for (key, config) in user_configs {
        if key.starts_with(SOURCE_PREFIX) {
            if let Some(spec) = synthesize_source_spec(key, config) {
                targets.push(DiscoveryTarget {
                    backend: key.clone(),
                    spec: Arc::new(spec),
                });
            }
            continue;
        }
        let Some(backend) = instructions.resolve_backend(key) else {
            tracing::debug!("config key {} does not map to a backend", key);
            continue;
        };
        let Some(spec) = catalog.servers.get(backend) else {
            tracing::debug!("backend {} is not in the catalog", backend);
            continue;
        };
        targets.push(DiscoveryTarget {
            backend: backend.to_string(),
            spec: Arc::new(spec.clone()),
        });
    }
    targets
}

async fn discover_backend(
    pool: &Arc<SessionPool>,
    cancel: &CancellationToken,
    caller_session: &str,
    target: &DiscoveryTarget,
) -> Result<Vec<rust_mcp_sdk::schema::Tool>, GatewayError> {
    let lease = pool
        .lease(cancel, &target.backend, caller_session, &target.spec)
        .await?;
    let listed = lease.session().list_tools().await;
    if let Err(e) = lease.release().await {
        tracing::warn!("release after discovery of {} failed: {}", target.backend, e);
    }
    Ok(listed?)
}

/// Run one discovery pass under `caller_session` and return the tools it found.
pub async fn discover(
    pool: Arc<SessionPool>,
    targets: Vec<DiscoveryTarget>,
    caller_session: &str,
    cancel: CancellationToken,
    concurrency: usize,
) -> ToolRegistry {
    let limit = Arc::new(Semaphore::new(concurrency.max(1)));
    tracing::info!(
        "discovering tools (backends={}, concurrency={})",
        targets.len(),
        concurrency
    );

    let mut set = JoinSet::new();
    for target in targets {
        let pool = pool.clone();
        let cancel = cancel.clone();
        let limit = limit.clone();
        let caller_session = caller_session.to_string();
        set.spawn(async move {
            let result = match limit.acquire_owned().await {
                Ok(_permit) => discover_backend(&pool, &cancel, &caller_session, &target).await,
                Err(_) => Ok(Vec::new()),
            };
            (target, result)
        });
    }

    let mut registry = ToolRegistry::new();
    let mut failed = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((target, Ok(tools))) => {
                tracing::info!("{} exposes {} tools", target.backend, tools.len());
                for tool in tools {
                    let name = registry.register(&target.backend, target.spec.clone(), tool);
                    tracing::debug!("registered tool {}", name);
                }
            }
            Ok((target, Err(e))) => {
                failed += 1;
                tracing::error!("tool discovery failed for {}: {}", target.backend, e);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("discovery task join error: {}", e);
            }
        }
    }
    if failed > 0 {
        tracing::error!("{} backends failed to load tools", failed);
    }
    registry
}
