//! Namespaced tool table built by one discovery pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_mcp_sdk::schema::Tool;

use crate::catalog::BackendSpec;

/// `<backend>-<tool>`.
pub fn namespaced_name(backend: &str, tool: &str) -> String {
    format!("{backend}-{tool}")
}

/// Undo [`namespaced_name`]; names without the prefix pass through.
pub fn strip_backend_prefix<'a>(name: &'a str, backend: &str) -> &'a str {
    name.strip_prefix(backend)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(name)
}

/// Where calls to a registered tool go.
#[derive(Debug, Clone)]
pub struct ToolRoute {
    pub backend: String,
    /// Descriptor snapshot the tool was discovered with.
    pub spec: Arc<BackendSpec>,
}

#[derive(Debug, Clone)]
struct RegisteredTool {
    tool: Tool,
    route: ToolRoute,
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool` under its namespaced name and return that name.
    pub fn register(&mut self, backend: &str, spec: Arc<BackendSpec>, mut tool: Tool) -> String {
        let name = namespaced_name(backend, &tool.name);
        tool.name = name.clone();
        if self.tools.contains_key(&name) {
            tracing::warn!("tool {} registered twice; keeping the latest", name);
        }
        self.tools.insert(
            name.clone(),
            RegisteredTool {
                tool,
                route: ToolRoute {
                    backend: backend.to_string(),
                    spec,
                },
            },
        );
        name
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.tool.clone()).collect()
    }

    pub fn route(&self, name: &str) -> Option<&ToolRoute> {
        self.tools.get(name).map(|t| &t.route)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
