//! Streamable HTTP client session.
//!
//! Every JSON-RPC request is a POST to the endpoint. The server answers with
//! either a JSON body or a `text/event-stream` body carrying the response
//! event. The `Mcp-Session-Id` returned by `initialize` is echoed on every
//! later request and the session is ended with a DELETE.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use rust_mcp_sdk::schema::{CallToolResult, ListToolsResult, Tool};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::remote::HeaderLayer;
use super::session::client_details;
use super::{BackendSession, ClientIdentity};
use crate::error::{SessionError, TransportError};

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// One `data:` payload of an event stream.
#[derive(Debug, Clone, Default, PartialEq)]
struct SseEvent {
    event: Option<String>,
    data: String,
}

fn parse_sse_events(body: &str) -> Vec<SseEvent> {
    let normalized = body.replace("\r\n", "\n");
    let mut events = Vec::new();
    for raw in normalized.split("\n\n") {
        let mut event = SseEvent::default();
        let mut has_data = false;
        for line in raw.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event.event = Some(value.to_string()),
                "data" => {
                    if has_data {
                        event.data.push('\n');
                    }
                    event.data.push_str(value);
                    has_data = true;
                }
                _ => {}
            }
        }
        if has_data {
            events.push(event);
        }
    }
    events
}

/// Pick the JSON-RPC response with `id` out of a response body.
fn extract_response(body: &str, is_event_stream: bool, id: i64) -> Result<JsonValue, String> {
    let messages: Vec<JsonValue> = if is_event_stream {
        parse_sse_events(body)
            .into_iter()
            .filter(|e| e.event.as_deref().is_none_or(|name| name == "message"))
            .filter_map(|e| serde_json::from_str(&e.data).ok())
            .collect()
    } else {
        match serde_json::from_str(body).map_err(|e| format!("invalid JSON response: {e}"))? {
            JsonValue::Array(batch) => batch,
            single => vec![single],
        }
    };

    let response = messages
        .into_iter()
        .find(|m| m.get("id").and_then(JsonValue::as_i64) == Some(id))
        .ok_or_else(|| format!("no response for request {id}"))?;
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown error");
        return Err(format!("rpc error: {message}"));
    }
    Ok(response.get("result").cloned().unwrap_or(JsonValue::Null))
}

pub struct StreamableHttpSession {
    backend: String,
    endpoint: String,
    client: reqwest::Client,
    layer: HeaderLayer,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
    closed: CancellationToken,
}

impl StreamableHttpSession {
    /// Connect and run the initialize handshake.
    pub async fn connect(
        backend: &str,
        identity: &ClientIdentity,
        endpoint: &str,
        layer: HeaderLayer,
    ) -> Result<Self, TransportError> {
        let connect_err = |reason: String| TransportError::Connect {
            server: backend.to_string(),
            reason,
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| connect_err(format!("build http client: {e}")))?;
        let session = Self {
            backend: backend.to_string(),
            endpoint: endpoint.to_string(),
            client,
            layer,
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
            closed: CancellationToken::new(),
        };

        let params = serde_json::to_value(client_details(identity))
            .map_err(|e| connect_err(e.to_string()))?;
        session
            .request("initialize", params)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        session
            .notify("notifications/initialized")
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        tracing::debug!("streamable http session established for {}", backend);
        Ok(session)
    }

    fn request_error(&self, method: &'static str, reason: impl Into<String>) -> SessionError {
        SessionError::Request {
            server: self.backend.clone(),
            method,
            reason: reason.into(),
        }
    }

    async fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_BOTH));
        self.layer.apply(&mut headers);
        if let Some(id) = self.session_id.lock().await.as_deref()
            && let Ok(value) = HeaderValue::from_str(id)
        {
            headers.insert(HeaderName::from_static(SESSION_HEADER), value);
        }
        headers
    }

    async fn post(&self, body: &JsonValue) -> Result<reqwest::Response, String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers().await)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        if let Some(id) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(id.to_string());
        }
        Ok(resp)
    }

    async fn request(&self, method: &'static str, params: JsonValue) -> Result<JsonValue, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed(self.backend.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let resp = self
            .post(&body)
            .await
            .map_err(|e| self.request_error(method, e))?;
        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = resp
            .text()
            .await
            .map_err(|e| self.request_error(method, e.to_string()))?;
        extract_response(&text, is_event_stream, id).map_err(|e| self.request_error(method, e))
    }

    async fn notify(&self, method: &'static str) -> Result<(), SessionError> {
        let body = json!({"jsonrpc": "2.0", "method": method});
        self.post(&body)
            .await
            .map(|_| ())
            .map_err(|e| self.request_error(method, e))
    }
}

#[async_trait]
impl BackendSession for StreamableHttpSession {
    async fn list_tools(&self) -> Result<Vec<Tool>, SessionError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match cursor.take() {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| self.request_error("tools/list", e.to_string()))?;
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
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = JsonValue::Object(arguments);
        }
        let result = self.request("tools/call", params).await?;
        serde_json::from_value(result).map_err(|e| self.request_error("tools/call", e.to_string()))
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let Some(id) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        let mut headers = HeaderMap::new();
        self.layer.apply(&mut headers);
        if let Ok(value) = HeaderValue::from_str(&id) {
            headers.insert(HeaderName::from_static(SESSION_HEADER), value);
        }
        let resp = self
            .client
            .delete(&self.endpoint)
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.request_error("delete", e.to_string()))?;
        // 405: the server does not support explicit termination.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::METHOD_NOT_ALLOWED {
            return Err(self.request_error("delete", format!("HTTP {}", resp.status())));
        }
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
