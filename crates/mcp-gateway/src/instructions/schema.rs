//! Combined JSON schema describing every backend's user configuration.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue, json};

use super::builder::{PropertyInfo, PropertyType, ServiceConfig};
use crate::naming::beautify_server_name;

fn docker_hub_url(server: &str) -> String {
    format!("https://hub.docker.com/mcp/server/{server}/overview")
}

fn property_schema(info: &PropertyInfo) -> JsonValue {
    let mut schema = match &info.kind {
        PropertyType::Simple(t) => json!({ "type": t }),
        PropertyType::ArrayOf(item) => json!({ "type": "array", "items": { "type": item } }),
    };
    if !info.description.is_empty() {
        schema["description"] = JsonValue::String(info.description.clone());
    }
    schema
}

fn service_schema(server: &str, service: &ServiceConfig) -> JsonValue {
    let properties: JsonMap<String, JsonValue> = service
        .properties
        .iter()
        .map(|(k, info)| (k.clone(), property_schema(info)))
        .collect();
    let mut schema = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
        "x-dockerHubUrl": docker_hub_url(server),
    });
    if !service.required.is_empty() {
        schema["required"] = json!(service.required);
    }
    if !service.title.is_empty() {
        schema["title"] = JsonValue::String(service.title.clone());
    }
    if !service.description.is_empty() {
        schema["description"] = JsonValue::String(service.description.clone());
    }
    schema
}

/// One object schema with a property per beautified backend name.
pub fn combined_schema(services: &BTreeMap<String, ServiceConfig>) -> JsonValue {
    let properties: JsonMap<String, JsonValue> = services
        .iter()
        .map(|(server, service)| {
            tracing::debug!("generated schema for service {}", server);
            (beautify_server_name(server), service_schema(server, service))
        })
        .collect();
    tracing::info!("combined schema generated (services={})", properties.len());
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BackendSpec, Catalog};
    use crate::instructions::build_instructions;

    #[test]
    fn schema_lists_properties_and_metadata() {
        let mut catalog = Catalog::default();
        catalog.servers.insert(
            "weather-mcp-server".into(),
            BackendSpec {
                title: "Weather".into(),
                config: vec![json!({
                    "properties": {"units": {"type": "string", "description": "metric or imperial"}}
                })],
                ..BackendSpec::default()
            },
        );
        let built = build_instructions(&catalog);
        let schema = combined_schema(&built.services);

        assert_eq!(schema["additionalProperties"], false);
        let weather = &schema["properties"]["weather"];
        assert_eq!(weather["title"], "Weather");
        assert!(weather.get("description").is_none());
        assert_eq!(weather["required"], json!(["units"]));
        assert_eq!(weather["properties"]["units"]["description"], "metric or imperial");
        assert_eq!(
            weather["x-dockerHubUrl"],
            "https://hub.docker.com/mcp/server/weather-mcp-server/overview"
        );
    }

    #[test]
    fn array_properties_carry_item_type() {
        let info = PropertyInfo {
            kind: PropertyType::ArrayOf("string".into()),
            description: String::new(),
        };
        assert_eq!(
            property_schema(&info),
            json!({"type": "array", "items": {"type": "string"}})
        );
    }
}
