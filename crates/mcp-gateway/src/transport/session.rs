//! Live backend sessions.
//!
//! Stdio and legacy SSE backends run on the rust-mcp-sdk client runtime;
//! streamable HTTP backends implement [`BackendSession`] directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::McpClient;
use rust_mcp_sdk::mcp_client::{ClientHandlerCore, ClientRuntime, client_runtime_core};
use rust_mcp_sdk::schema::schema_utils::{
    NotificationFromServer, RequestFromServer, ResultFromClient,
};
use rust_mcp_sdk::schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, Implementation,
    InitializeRequestParams, LATEST_PROTOCOL_VERSION, ListToolsRequestParams, RpcError, Tool,
};
use rust_mcp_sdk::{
    ClientSseTransport, ClientSseTransportOptions, StdioTransport, TransportOptions,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio_util::sync::CancellationToken;

use super::ClientIdentity;
use crate::error::{SessionError, TransportError};

/// An open connection to one backend.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Every tool the backend exposes, following pagination.
    async fn list_tools(&self) -> Result<Vec<Tool>, SessionError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonMap<String, JsonValue>>,
    ) -> Result<CallToolResult, SessionError>;

    /// Idempotent.
    async fn close(&self) -> Result<(), SessionError>;

    /// Cancelled once the session is closed.
    fn closed(&self) -> CancellationToken;
}

/// Close `session` when `caller` is cancelled, unless it closes first.
pub fn close_on_cancel(session: Arc<dyn BackendSession>, backend: String, caller: CancellationToken) {
    let closed = session.closed();
    tokio::spawn(async move {
        tokio::select! {
            _ = closed.cancelled() => {}
            _ = caller.cancelled() => {
                tracing::debug!("caller cancelled; closing session for {}", backend);
                if let Err(e) = session.close().await {
                    tracing::warn!("closing session for {} failed: {}", backend, e);
                }
            }
        }
    });
}

pub(crate) fn client_details(identity: &ClientIdentity) -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: identity.name.clone(),
            version: identity.version.clone(),
            title: None,
        },
        protocol_version: LATEST_PROTOCOL_VERSION.into(),
    }
}

/// Session backed by the SDK client runtime.
pub struct McpClientSession {
    backend: String,
    client: Arc<ClientRuntime>,
    closed: CancellationToken,
}

impl McpClientSession {
    async fn start(backend: &str, client: Arc<ClientRuntime>) -> Result<Self, TransportError> {
        client
            .clone()
            .start()
            .await
            .map_err(|e| TransportError::Connect {
                server: backend.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!("client session started for {}", backend);
        Ok(Self {
            backend: backend.to_string(),
            client,
            closed: CancellationToken::new(),
        })
    }

    /// Spawn `command` and speak MCP over its stdio.
    pub async fn launch_stdio(
        backend: &str,
        identity: &ClientIdentity,
        command: &str,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, TransportError> {
        let transport =
            StdioTransport::create_with_server_launch(command, args, env, TransportOptions::default())
                .map_err(|e| TransportError::Connect {
                    server: backend.to_string(),
                    reason: format!("launch {command}: {e}"),
                })?;
        let client =
            client_runtime_core::create_client(client_details(identity), transport, NoopClientHandler);
        Self::start(backend, client).await
    }

    /// Connect to a legacy SSE endpoint.
    pub async fn connect_sse(
        backend: &str,
        identity: &ClientIdentity,
        url: &str,
        headers: HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let options = ClientSseTransportOptions {
            custom_headers: (!headers.is_empty()).then_some(headers),
            ..Default::default()
        };
        let transport = ClientSseTransport::new(url, options).map_err(|e| TransportError::Connect {
            server: backend.to_string(),
            reason: format!("sse {url}: {e}"),
        })?;
        let client =
            client_runtime_core::create_client(client_details(identity), transport, NoopClientHandler);
        Self::start(backend, client).await
    }

    fn request_error(&self, method: &'static str, e: impl std::fmt::Display) -> SessionError {
        SessionError::Request {
            server: self.backend.clone(),
            method,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl BackendSession for McpClientSession {
    async fn list_tools(&self) -> Result<Vec<Tool>, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed(self.backend.clone()));
        }
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|c| ListToolsRequestParams { cursor: Some(c) });
            let page = self
                .client
                .list_tools(params)
                .await
                .map_err(|e| self.request_error("tools/list", e))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonMap<String, JsonValue>>,
    ) -> Result<CallToolResult, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed(self.backend.clone()));
        }
        self.client
            .call_tool(CallToolRequestParams {
                name: name.to_string(),
                arguments,
            })
            .await
            .map_err(|e| self.request_error("tools/call", e))
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        self.client
            .shut_down()
            .await
            .map_err(|e| self.request_error("shutdown", e))
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Backends never get sampling or roots from the gateway.
#[derive(Clone)]
struct NoopClientHandler;

#[async_trait]
impl ClientHandlerCore for NoopClientHandler {
    async fn handle_request(
        &self,
        _request: RequestFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<ResultFromClient, RpcError> {
        Err(RpcError::method_not_found())
    }

    async fn handle_notification(
        &self,
        _notification: NotificationFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }

    async fn handle_error(
        &self,
        _error: &RpcError,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeSession;
    use std::time::Duration;

    #[tokio::test]
    async fn caller_cancel_closes_bound_session() {
        let session = FakeSession::new("svc", vec!["echo"]);
        let caller = CancellationToken::new();
        close_on_cancel(session.clone(), "svc".into(), caller.clone());

        caller.cancel();
        tokio::time::timeout(Duration::from_secs(1), session.closed().cancelled())
            .await
            .expect("session closed after caller cancel");
        assert_eq!(session.close_calls(), 1);
    }

    #[tokio::test]
    async fn watcher_exits_when_session_closes_first() {
        let session = FakeSession::new("svc", vec![]);
        let caller = CancellationToken::new();
        close_on_cancel(session.clone(), "svc".into(), caller.clone());

        session.close().await.expect("close");
        tokio::task::yield_now().await;
        caller.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.close_calls(), 1);
    }

    #[test]
    fn client_details_carry_identity() {
        let details = client_details(&ClientIdentity::default());
        assert_eq!(details.client_info.name, "mcp-gateway");
        assert_eq!(details.client_info.version, env!("CARGO_PKG_VERSION"));
    }
}
