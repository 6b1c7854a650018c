//! Catalog domain types mirroring the Docker MCP catalog layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Reserved env entry used to carry an install step for source backends.
pub const INSTALL_COMMAND_ENV: &str = "INSTALL_COMMAND";

/// Backend kind as declared by the catalog `type` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackendKind {
    /// Containerized stdio server (`server`).
    #[default]
    Container,
    /// Remote HTTP server (`remote`).
    Remote,
    /// Source repository cloned and run locally (`github`).
    Source,
    /// Any other catalog type (e.g. `poci`); launched as a container.
    Other(String),
}

impl From<String> for BackendKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "server" => BackendKind::Container,
            "remote" => BackendKind::Remote,
            "github" => BackendKind::Source,
            _ => BackendKind::Other(value),
        }
    }
}

impl From<BackendKind> for String {
    fn from(value: BackendKind) -> Self {
        match value {
            BackendKind::Container => "server".to_string(),
            BackendKind::Remote => "remote".to_string(),
            BackendKind::Source => "github".to_string(),
            BackendKind::Other(s) => s,
        }
    }
}

/// A single `NAME=value` environment entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Secret declaration: user-facing name plus the env var it lands in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub env: String,
}

/// Remote endpoint settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "transport_type")]
    pub transport_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Declarative description of one backend tool server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: BackendKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub disable_network: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub long_lived: bool,
    #[serde(default)]
    pub remote: Remote,
    /// Deprecated SSE endpoint; used when `remote.url` is empty.
    #[serde(default)]
    pub sse_endpoint: String,
    /// Raw configuration schema tree; the first entry carries `properties`.
    #[serde(default)]
    pub config: Vec<JsonValue>,
}

impl BackendSpec {
    /// Look up an env entry value by name.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}

/// Backend descriptors keyed by their stable catalog name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub servers: BTreeMap<String, BackendSpec>,
}

/// On-disk catalog document (`registry:` layout).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogFile {
    #[serde(default)]
    pub registry: BTreeMap<String, BackendSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_catalog_strings() {
        assert_eq!(BackendKind::from("server".to_string()), BackendKind::Container);
        assert_eq!(BackendKind::from("remote".to_string()), BackendKind::Remote);
        assert_eq!(BackendKind::from("github".to_string()), BackendKind::Source);
        assert_eq!(
            BackendKind::from("poci".to_string()),
            BackendKind::Other("poci".to_string())
        );
        assert_eq!(String::from(BackendKind::Source), "github");
    }

    #[test]
    fn spec_deserializes_camel_case_fields() {
        let yaml = r#"
type: remote
longLived: true
disableNetwork: true
sseEndpoint: https://example.com/sse
remote:
  url: https://example.com/mcp
  transport_type: streamable-http
  headers:
    Authorization: Bearer ${TOKEN}
env:
  - name: TOKEN
    value: abc
"#;
        let spec: BackendSpec = serde_yaml::from_str(yaml).expect("parse spec");
        assert_eq!(spec.kind, BackendKind::Remote);
        assert!(spec.long_lived);
        assert!(spec.disable_network);
        assert_eq!(spec.remote.transport_type, "streamable-http");
        assert_eq!(spec.env_value("TOKEN"), Some("abc"));
        assert_eq!(spec.env_value("MISSING"), None);
    }
}
