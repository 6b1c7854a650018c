//! Remote HTTP backends: legacy SSE or streamable HTTP.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};

use super::http_session::StreamableHttpSession;
use super::{BackendSession, ClientIdentity, McpClientSession};
use crate::catalog::BackendSpec;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// Legacy event-stream transport.
    Sse,
    /// Bidirectional streamable HTTP.
    Streamable,
}

impl RemoteMode {
    pub fn parse(transport: &str) -> Option<Self> {
        match transport.to_ascii_lowercase().as_str() {
            "sse" => Some(RemoteMode::Sse),
            "http" | "streamable" | "streaming" | "streamable-http" => Some(RemoteMode::Streamable),
            _ => None,
        }
    }
}

/// Endpoint and mode for a remote descriptor; `sseEndpoint` is the legacy
/// fallback and always means SSE.
pub fn resolve_endpoint(
    spec: &BackendSpec,
    backend: &str,
) -> Result<(String, RemoteMode), TransportError> {
    let (url, transport) = if spec.remote.url.is_empty() && !spec.sse_endpoint.is_empty() {
        (spec.sse_endpoint.as_str(), "sse")
    } else {
        (spec.remote.url.as_str(), spec.remote.transport_type.as_str())
    };
    if url.is_empty() {
        return Err(TransportError::InvalidDescriptor {
            server: backend.to_string(),
            reason: "no remote URL configured".to_string(),
        });
    }
    let mode = RemoteMode::parse(transport).ok_or_else(|| TransportError::UnsupportedRemote {
        server: backend.to_string(),
        transport: transport.to_string(),
    })?;
    Ok((url.to_string(), mode))
}

/// Declared headers added to every outgoing request.
#[derive(Debug, Clone, Default)]
pub struct HeaderLayer {
    headers: BTreeMap<String, String>,
}

impl HeaderLayer {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self { headers }
    }

    fn is_accept(name: &str) -> bool {
        name.eq_ignore_ascii_case(ACCEPT.as_str())
    }

    /// Insert declared headers, keeping an `Accept` the transport already set.
    pub fn apply(&self, map: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if Self::is_accept(name) && map.contains_key(ACCEPT) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => tracing::warn!("skipping invalid header {}", name),
            }
        }
    }

    /// Headers for the SSE client, which always sets its own `Accept`.
    pub fn sse_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter(|(name, _)| !Self::is_accept(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

pub async fn create_session(
    identity: &ClientIdentity,
    spec: &BackendSpec,
    backend: &str,
) -> Result<Arc<dyn BackendSession>, TransportError> {
    let (url, mode) = resolve_endpoint(spec, backend)?;
    let layer = HeaderLayer::new(spec.remote.headers.clone());
    tracing::info!("connecting to remote {} ({:?}) at {}", backend, mode, url);
    let session: Arc<dyn BackendSession> = match mode {
        RemoteMode::Sse => Arc::new(
            McpClientSession::connect_sse(backend, identity, &url, layer.sse_headers()).await?,
        ),
        RemoteMode::Streamable => {
            Arc::new(StreamableHttpSession::connect(backend, identity, &url, layer).await?)
        }
    };
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Remote;

    fn remote(url: &str, transport: &str) -> BackendSpec {
        BackendSpec {
            remote: Remote {
                url: url.into(),
                transport_type: transport.into(),
                ..Remote::default()
            },
            ..BackendSpec::default()
        }
    }

    #[test]
    fn streamable_aliases_are_accepted() {
        for t in ["http", "streamable", "Streaming", "streamable-http"] {
            let (_, mode) = resolve_endpoint(&remote("https://x/mcp", t), "svc").expect(t);
            assert_eq!(mode, RemoteMode::Streamable);
        }
        let (_, mode) = resolve_endpoint(&remote("https://x/sse", "SSE"), "svc").expect("sse");
        assert_eq!(mode, RemoteMode::Sse);
    }

    #[test]
    fn legacy_sse_endpoint_forces_sse() {
        let mut spec = remote("", "streamable-http");
        spec.sse_endpoint = "https://legacy/sse".into();
        let (url, mode) = resolve_endpoint(&spec, "svc").expect("fallback");
        assert_eq!(url, "https://legacy/sse");
        assert_eq!(mode, RemoteMode::Sse);
    }

    #[test]
    fn unknown_mode_and_missing_url_are_errors() {
        assert!(matches!(
            resolve_endpoint(&remote("https://x", "websocket"), "svc"),
            Err(TransportError::UnsupportedRemote { .. })
        ));
        assert!(matches!(
            resolve_endpoint(&remote("", "sse"), "svc"),
            Err(TransportError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn header_layer_keeps_existing_accept() {
        let layer = HeaderLayer::new(BTreeMap::from([
            ("Accept".to_string(), "text/plain".to_string()),
            ("Authorization".to_string(), "Bearer t".to_string()),
        ]));

        let mut preset = HeaderMap::new();
        preset.insert(ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        layer.apply(&mut preset);
        assert_eq!(preset[ACCEPT], "application/json, text/event-stream");
        assert_eq!(preset["authorization"], "Bearer t");

        let mut empty = HeaderMap::new();
        layer.apply(&mut empty);
        assert_eq!(empty[ACCEPT], "text/plain");

        let sse = layer.sse_headers();
        assert!(!sse.contains_key("Accept"));
        assert_eq!(sse.get("Authorization").map(String::as_str), Some("Bearer t"));
    }
}
