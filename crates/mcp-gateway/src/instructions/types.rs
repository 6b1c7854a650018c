//! Instruction records and the read-only instruction map.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// What an instruction does with a user value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionKind {
    /// Base entry mapping a beautified name to its catalog name.
    #[default]
    #[serde(rename = "")]
    Base,
    /// Store the value in an environment variable.
    #[serde(rename = "secret")]
    Secret,
    /// Store the value under a path of the backend config tree.
    #[serde(rename = "config")]
    Config,
}

/// One entry of the instruction map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Real catalog name, e.g. `github-mcp-server`.
    pub server: String,
    #[serde(rename = "type", default)]
    pub kind: InstructionKind,
    #[serde(rename = "envName", default, skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl Instruction {
    pub fn base(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn secret(server: impl Into<String>, env_name: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            kind: InstructionKind::Secret,
            env_name: Some(env_name.into()),
            path: Vec::new(),
        }
    }

    pub fn config(server: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            server: server.into(),
            kind: InstructionKind::Config,
            env_name: None,
            path,
        }
    }
}

/// Flattened key (`beautified` or `beautified.property`) to instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionMap(BTreeMap<String, Instruction>);

impl InstructionMap {
    pub fn insert(&mut self, key: impl Into<String>, instruction: Instruction) {
        self.0.insert(key.into(), instruction);
    }

    pub fn get(&self, key: &str) -> Option<&Instruction> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `mapping.json` document.
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a `mapping.json` file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read instruction map {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("parse instruction map {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }

    /// Resolve the real catalog name for a beautified name.
    ///
    /// The base entry wins. Without one, the lexicographically smallest
    /// `beautified.*` key carrying a server name decides, so the result does
    /// not depend on map iteration order.
    pub fn resolve_backend(&self, beautified: &str) -> Option<&str> {
        if let Some(base) = self.0.get(beautified)
            && !base.server.is_empty()
        {
            return Some(base.server.as_str());
        }
        let prefix = format!("{beautified}.");
        self.0
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .find(|(key, ins)| key.len() > prefix.len() && !ins.server.is_empty())
            .map(|(_, ins)| ins.server.as_str())
    }
}
