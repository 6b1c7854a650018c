//! Derive instructions and user-facing property lists from a catalog.
//!
//! Every backend gets a base entry; nested `config` properties are flattened
//! into camelCase keys (`url.connection.jdbc` -> `urlConnectionJdbc`) whose
//! instruction keeps the nested property path, and secrets become secret
//! instructions keyed by their env name minus the service prefix.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{Instruction, InstructionMap};
use crate::catalog::{BackendKind, BackendSpec, Catalog};
use crate::naming::{beautify_server_name, extract_secret_key, to_camel_case};

/// JSON schema type of a flattened property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    Simple(String),
    ArrayOf(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub kind: PropertyType,
    pub description: String,
}

impl PropertyInfo {
    fn string(description: &str) -> Self {
        Self {
            kind: PropertyType::Simple("string".to_string()),
            description: description.to_string(),
        }
    }
}

/// User-facing configuration surface of one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub title: String,
    pub description: String,
    pub properties: BTreeMap<String, PropertyInfo>,
    pub required: Vec<String>,
}

/// Result of transforming a catalog.
#[derive(Debug, Clone, Default)]
pub struct BuiltInstructions {
    pub instructions: InstructionMap,
    /// Keyed by real catalog name.
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Transform every catalog backend into instructions and property lists.
pub fn build_instructions(catalog: &Catalog) -> BuiltInstructions {
    let mut out = BuiltInstructions::default();
    if catalog.servers.is_empty() {
        tracing::warn!("empty catalog provided");
        return out;
    }
    for (name, server) in &catalog.servers {
        if matches!(&server.kind, BackendKind::Other(kind) if kind == "poci") {
            tracing::info!("skipping server '{}' with type 'poci'", name);
            continue;
        }
        let service = build_service_config(name, server, &mut out.instructions);
        tracing::debug!(
            "transformed server '{}' (properties={}, required={})",
            name,
            service.properties.len(),
            service.required.len()
        );
        out.services.insert(name.clone(), service);
    }
    tracing::info!(
        "catalog transformation complete (servers={}, instructions={})",
        out.services.len(),
        out.instructions.len()
    );
    out
}

fn string_list(value: Option<&JsonValue>) -> Vec<&str> {
    value
        .and_then(JsonValue::as_array)
        .map(|items| items.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default()
}

fn build_service_config(
    name: &str,
    server: &BackendSpec,
    instructions: &mut InstructionMap,
) -> ServiceConfig {
    let beautified = beautify_server_name(name);
    instructions.insert(beautified.clone(), Instruction::base(name));

    let mut extractor = Extractor {
        server: name,
        beautified: &beautified,
        instructions,
        properties: BTreeMap::new(),
        required: Vec::new(),
    };

    for item in &server.config {
        let Some(properties) = item.get("properties").and_then(JsonValue::as_object) else {
            continue;
        };
        for key in string_list(item.get("required")) {
            extractor.required.push(to_camel_case(key));
        }
        extractor.extract(properties, "", &[]);
    }

    for secret in &server.secrets {
        let key = to_camel_case(&extract_secret_key(&secret.env, name).to_lowercase());
        extractor
            .properties
            .insert(key.clone(), PropertyInfo::string(""));
        extractor.instructions.insert(
            format!("{beautified}.{key}"),
            Instruction::secret(name, secret.env.clone()),
        );
    }

    let Extractor {
        properties,
        mut required,
        ..
    } = extractor;
    // No explicit `required` anywhere: every key is required.
    if required.is_empty() {
        required = properties.keys().cloned().collect();
    }

    ServiceConfig {
        title: server.title.clone(),
        description: server.description.clone(),
        properties,
        required,
    }
}

struct Extractor<'a> {
    server: &'a str,
    beautified: &'a str,
    instructions: &'a mut InstructionMap,
    properties: BTreeMap<String, PropertyInfo>,
    required: Vec<String>,
}

impl Extractor<'_> {
    fn extract(&mut self, properties: &JsonMap<String, JsonValue>, prefix: &str, path: &[String]) {
        for (prop_name, prop_value) in properties {
            let full_key = if prefix.is_empty() {
                prop_name.clone()
            } else {
                format!("{prefix}_{prop_name}")
            };
            let mut current_path = path.to_vec();
            current_path.push(prop_name.clone());

            let Some(prop) = prop_value.as_object() else {
                self.leaf(&full_key, current_path, PropertyInfo::string(""));
                continue;
            };
            let description = prop
                .get("description")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();

            if let Some(nested) = prop.get("properties").and_then(JsonValue::as_object) {
                for key in string_list(prop.get("required")) {
                    self.required.push(to_camel_case(&format!("{full_key}_{key}")));
                }
                self.extract(nested, &full_key, &current_path);
                continue;
            }

            let info = match prop.get("type").and_then(JsonValue::as_str) {
                Some("array") => match prop
                    .get("items")
                    .and_then(|items| items.get("type"))
                    .and_then(JsonValue::as_str)
                {
                    Some(item_type) => PropertyInfo {
                        kind: PropertyType::ArrayOf(item_type.to_string()),
                        description: description.to_string(),
                    },
                    None => PropertyInfo {
                        kind: PropertyType::Simple("array".to_string()),
                        description: description.to_string(),
                    },
                },
                Some(t) => PropertyInfo {
                    kind: PropertyType::Simple(t.to_string()),
                    description: description.to_string(),
                },
                None => PropertyInfo::string(description),
            };
            self.leaf(&full_key, current_path, info);
        }
    }

    fn leaf(&mut self, full_key: &str, path: Vec<String>, info: PropertyInfo) {
        let camel = to_camel_case(full_key);
        let key = format!("{}.{}", self.beautified, camel);
        tracing::debug!("property extracted: {} -> {:?}", key, path);
        self.instructions
            .insert(key, Instruction::config(self.server, path));
        self.properties.insert(camel, info);
    }
}
