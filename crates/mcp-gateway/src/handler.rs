//! MCP server handler that fronts every configured backend.
//!
//! `tools/list` answers from the gateway's registry (waiting for any running
//! discovery pass) and `tools/call` forwards to the backend that owns the
//! namespaced tool.

use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    ClientRequest, ListToolsResult, RpcError,
    schema_utils::{NotificationFromClient, RequestFromClient, ResultFromServer},
};
use rust_mcp_sdk::{
    McpServer,
    mcp_server::{ServerHandlerCore, enforce_compatible_protocol_version},
};

use crate::error::GatewayError;
use crate::gateway::{CallerContext, Gateway};

pub struct GatewayHandler {
    gateway: Arc<Gateway>,
    /// Identity for transports without a session id (stdio).
    stdio_caller: CallerContext,
}

impl GatewayHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let stdio_caller = gateway.new_caller();
        tracing::debug!("initialized GatewayHandler (stdio caller={})", stdio_caller.session_id);
        Self {
            gateway,
            stdio_caller,
        }
    }

    /// Each HTTP session calls under its own transport session id.
    fn caller_for(&self, session_id: Option<String>) -> CallerContext {
        match session_id {
            Some(id) => self.gateway.caller(id),
            None => self.stdio_caller.clone(),
        }
    }
}

fn call_error(tool: &str, err: GatewayError) -> RpcError {
    match err {
        GatewayError::UnknownTool(_) => {
            tracing::warn!("unknown tool: {}", tool);
            RpcError::method_not_found().with_message(format!("Unknown tool '{tool}'"))
        }
        other => {
            tracing::error!("call to {} failed: {}", tool, other);
            RpcError::internal_error().with_message(other.to_string())
        }
    }
}

#[async_trait]
impl ServerHandlerCore for GatewayHandler {
    async fn handle_request(
        &self,
        request: RequestFromClient,
        runtime: &dyn McpServer,
    ) -> std::result::Result<ResultFromServer, RpcError> {
        let method_name = request.method().to_owned();
        tracing::info!("handle_request: method={}", method_name);
        match request {
            RequestFromClient::ClientRequest(client_request) => match client_request {
                ClientRequest::InitializeRequest(initialize_request) => {
                    let mut server_info = runtime.server_info().to_owned();
                    if let Some(updated_protocol_version) = enforce_compatible_protocol_version(
                        &initialize_request.params.protocol_version,
                        &server_info.protocol_version,
                    )
                    .map_err(|err| {
                        tracing::error!(
                            "incompatible protocol version (client={}, server={})",
                            initialize_request.params.protocol_version,
                            server_info.protocol_version
                        );
                        RpcError::internal_error().with_message(err.to_string())
                    })? {
                        server_info.protocol_version = updated_protocol_version;
                    }
                    tracing::info!("initialized (protocol={})", server_info.protocol_version);
                    Ok(server_info.into())
                }

                ClientRequest::ListToolsRequest(_) => {
                    let tools = self.gateway.list_tools().await;
                    tracing::info!("list_tools (count={})", tools.len());
                    Ok(ListToolsResult {
                        meta: None,
                        next_cursor: None,
                        tools,
                    }
                    .into())
                }

                ClientRequest::CallToolRequest(request) => {
                    let tool = request.tool_name().to_string();
                    let arg_keys = request
                        .params
                        .arguments
                        .as_ref()
                        .map(|m| m.keys().cloned().collect::<Vec<_>>())
                        .unwrap_or_default();
                    tracing::info!("call_tool request: tool={}, arg_keys={:?}", tool, arg_keys);
                    let caller = self.caller_for(runtime.session_id());
                    let result = self
                        .gateway
                        .call_tool(&caller, &tool, request.params.arguments)
                        .await
                        .map_err(|e| call_error(&tool, e))?;
                    Ok(result.into())
                }

                _ => {
                    tracing::warn!("method not implemented: {}", method_name);
                    Err(RpcError::method_not_found()
                        .with_message(format!("No handler is implemented for '{method_name}'.")))
                }
            },
            RequestFromClient::CustomRequest(_) => {
                tracing::warn!("custom request not implemented");
                Err(RpcError::method_not_found()
                    .with_message("No handler is implemented for custom requests.".to_string()))
            }
        }
    }

    async fn handle_notification(
        &self,
        notification: NotificationFromClient,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        match &notification {
            NotificationFromClient::ClientNotification(_) => {
                tracing::debug!("handle_notification: client notification")
            }
            NotificationFromClient::CustomNotification(_) => {
                tracing::debug!("handle_notification: custom notification")
            }
        }
        Ok(())
    }

    async fn handle_error(
        &self,
        error: &RpcError,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        tracing::error!(
            "handle_error from client (code={:?}, message={:?})",
            error.code,
            error.message
        );
        Ok(())
    }
}
