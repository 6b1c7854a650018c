//! Gateway context: catalog snapshot, user configuration, pool and tools.
//!
//! Every config load merges into a copy of the pristine catalog and swaps the
//! active snapshot only when the merge succeeds. The loading gate is taken
//! before `load_config` returns and held by the discovery task, so a
//! following `list_tools` always sees the completed tool set.

use std::sync::Arc;

use rust_mcp_sdk::schema::{CallToolResult, Tool};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::discovery::{self, plan_targets};
use crate::error::{GatewayError, GatewayResult, SessionError};
use crate::instructions::InstructionMap;
use crate::merge::{UserConfigs, merge_user_configs};
use crate::pool::SessionPool;
use crate::registry::{ToolRegistry, strip_backend_prefix};

/// Who is calling, for session keying and cancellation.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub session_id: String,
    pub cancel: CancellationToken,
}

pub struct Gateway {
    base_catalog: Arc<Catalog>,
    instructions: Arc<InstructionMap>,
    catalog: RwLock<Arc<Catalog>>,
    user_configs: RwLock<Arc<UserConfigs>>,
    registry: RwLock<Arc<ToolRegistry>>,
    loading: Arc<Mutex<()>>,
    pool: Arc<SessionPool>,
    shutdown: CancellationToken,
    concurrency: usize,
    /// Caller session shared by every discovery pass, so long-lived
    /// backends are reused across reloads.
    discovery_caller: String,
}

impl Gateway {
    pub fn new(
        catalog: Catalog,
        instructions: InstructionMap,
        pool: Arc<SessionPool>,
        concurrency: usize,
    ) -> Arc<Self> {
        let base_catalog = Arc::new(catalog);
        Arc::new(Self {
            catalog: RwLock::new(base_catalog.clone()),
            base_catalog,
            instructions: Arc::new(instructions),
            user_configs: RwLock::new(Arc::new(UserConfigs::new())),
            registry: RwLock::new(Arc::new(ToolRegistry::new())),
            loading: Arc::new(Mutex::new(())),
            pool,
            shutdown: CancellationToken::new(),
            concurrency,
            discovery_caller: format!("discovery-{}", uuid::Uuid::new_v4()),
        })
    }

    /// Caller context for a front-facing session; cancelled on shutdown.
    pub fn caller(&self, session_id: impl Into<String>) -> CallerContext {
        CallerContext {
            session_id: session_id.into(),
            cancel: self.shutdown.child_token(),
        }
    }

    /// A caller with a fresh random session id.
    pub fn new_caller(&self) -> CallerContext {
        self.caller(uuid::Uuid::new_v4().to_string())
    }

    pub async fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().await.clone()
    }

    /// Parse a user configuration document.
    pub fn parse_user_configs(raw: &str) -> GatewayResult<UserConfigs> {
        if raw.trim().is_empty() {
            return Ok(UserConfigs::new());
        }
        serde_json::from_str(raw).map_err(|e| GatewayError::InvalidConfig(e.to_string()))
    }

    /// Apply `user_configs` and start a discovery pass.
    ///
    /// On error nothing changes. On success the returned task finishes when
    /// discovery has swapped in the new tool set.
    pub async fn load_config(self: &Arc<Self>, user_configs: UserConfigs) -> GatewayResult<JoinHandle<()>> {
        let gate = self.loading.clone().lock_owned().await;

        let mut next = (*self.base_catalog).clone();
        merge_user_configs(&mut next, &self.instructions, &user_configs)?;

        let backends = user_configs.len();
        *self.catalog.write().await = Arc::new(next);
        *self.user_configs.write().await = Arc::new(user_configs);
        tracing::info!("config loaded (backends={})", backends);

        let gateway = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let targets = {
                let catalog = gateway.catalog().await;
                let user_configs = gateway.user_configs.read().await.clone();
                plan_targets(&catalog, &gateway.instructions, &user_configs)
            };
            let registry = discovery::discover(
                gateway.pool.clone(),
                targets,
                &gateway.discovery_caller,
                gateway.shutdown.child_token(),
                gateway.concurrency,
            )
            .await;
            if registry.is_empty() {
                tracing::warn!("discovery finished without any tools");
            } else {
                tracing::info!("discovery finished (tools={})", registry.len());
            }
            *gateway.registry.write().await = Arc::new(registry);
            drop(gate);
        }))
    }

    /// Current tool set; waits for an in-flight discovery pass.
    pub async fn list_tools(&self) -> Vec<Tool> {
        let _loading = self.loading.lock().await;
        self.registry.read().await.tools()
    }

    /// Forward a namespaced tool call to its backend.
    pub async fn call_tool(
        &self,
        caller: &CallerContext,
        name: &str,
        arguments: Option<JsonMap<String, JsonValue>>,
    ) -> GatewayResult<CallToolResult> {
        let route = self
            .registry
            .read()
            .await
            .route(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;

        let lease = self
            .pool
            .lease(&caller.cancel, &route.backend, &caller.session_id, &route.spec)
            .await?;
        let tool = strip_backend_prefix(name, &route.backend);
        tracing::debug!("forwarding {} to {} as {}", name, route.backend, tool);
        let result = lease.session().call_tool(tool, arguments).await;
        if let Err(e) = lease.release().await {
            tracing::warn!("release after call to {} failed: {}", route.backend, e);
        }
        Ok(result?)
    }

    /// Cancel callers and close every pooled session.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.shutdown.cancel();
        self.pool.close().await
    }
}
