//! Apply flat user configuration to catalog descriptors.
//!
//! Each beautified backend name in the user config is resolved to its real
//! catalog name through the instruction map. Secret instructions upsert env
//! entries, config instructions write a `value` leaf under
//! `config[0].properties`. Placeholders and env references are resolved
//! afterwards so templates can see the merged values.

mod eval;
mod interpolate;

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::catalog::{BackendSpec, Catalog, EnvVar};
use crate::error::{GatewayError, MergeError};
use crate::instructions::{InstructionKind, InstructionMap};
use crate::naming::camel_to_snake;

pub use eval::{evaluate, evaluate_list, stringify};
pub use interpolate::{EnvMap, interpolate_env_vars};

/// Flat property map for one backend, keyed by user-facing property name.
pub type UserConfig = JsonMap<String, JsonValue>;

/// Beautified backend name to its flat property map.
pub type UserConfigs = BTreeMap<String, UserConfig>;

/// Merge every user config into `catalog`.
///
/// Unknown names and keys are skipped. The first structural error aborts the
/// whole merge, so callers should merge into a scratch copy.
pub fn merge_user_configs(
    catalog: &mut Catalog,
    instructions: &InstructionMap,
    user_configs: &UserConfigs,
) -> Result<(), GatewayError> {
    for (beautified, user_config) in user_configs {
        let Some(server_name) = instructions.resolve_backend(beautified) else {
            tracing::debug!("no instructions for '{}', skipping", beautified);
            continue;
        };
        let Some(spec) = catalog.servers.get(server_name) else {
            tracing::debug!("server '{}' not in catalog, skipping", server_name);
            continue;
        };

        let mut merged = spec.clone();
        apply_user_config(&mut merged, server_name, beautified, user_config, instructions)
            .map_err(|source| GatewayError::Merge {
                server: server_name.to_string(),
                source,
            })?;
        evaluate_placeholders(&mut merged, server_name, beautified, user_config);
        tracing::debug!("merged user config into '{}'", server_name);
        catalog.servers.insert(server_name.to_string(), merged);
    }
    Ok(())
}

fn apply_user_config(
    spec: &mut BackendSpec,
    server_name: &str,
    beautified: &str,
    user_config: &UserConfig,
    instructions: &InstructionMap,
) -> Result<(), MergeError> {
    for (user_key, value) in user_config {
        let key = format!("{beautified}.{user_key}");
        let Some(instruction) = instructions.get(&key) else {
            continue;
        };
        if instruction.server != server_name {
            continue;
        }
        match instruction.kind {
            InstructionKind::Secret => {
                let env_name = instruction
                    .env_name
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| MergeError::MissingEnvName { key: key.clone() })?;
                apply_secret(spec, env_name, value);
            }
            InstructionKind::Config => {
                if instruction.path.is_empty() {
                    return Err(MergeError::EmptyPath { key });
                }
                apply_config(spec, &instruction.path, value);
            }
            InstructionKind::Base => return Err(MergeError::UnsupportedInstruction { key }),
        }
    }
    Ok(())
}

/// Upsert `env_name` in the descriptor's env list.
pub fn apply_secret(spec: &mut BackendSpec, env_name: &str, value: &JsonValue) {
    let value = stringify(value);
    match spec.env.iter_mut().find(|e| e.name == env_name) {
        Some(existing) => existing.value = value,
        None => spec.env.push(EnvVar::new(env_name, value)),
    }
}

fn object_entry<'a>(
    map: &'a mut JsonMap<String, JsonValue>,
    key: &str,
) -> Option<&'a mut JsonMap<String, JsonValue>> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| JsonValue::Object(JsonMap::new()));
    if !slot.is_object() {
        *slot = JsonValue::Object(JsonMap::new());
    }
    slot.as_object_mut()
}

/// Set `value` at `config[0].properties.<p1>.properties.<p2>...value`.
///
/// Existing siblings are kept; non-object nodes on the way are replaced.
pub fn apply_config(spec: &mut BackendSpec, path: &[String], value: &JsonValue) {
    if spec.config.is_empty() {
        spec.config.push(JsonValue::Object(JsonMap::new()));
    }
    if !spec.config[0].is_object() {
        spec.config[0] = JsonValue::Object(JsonMap::new());
    }
    if let Some(root) = spec.config[0].as_object_mut() {
        set_leaf(root, path, value);
    }
}

fn set_leaf(node: &mut JsonMap<String, JsonValue>, path: &[String], value: &JsonValue) -> Option<()> {
    let (key, rest) = path.split_first()?;
    let property = object_entry(object_entry(node, "properties")?, key)?;
    if rest.is_empty() {
        property.insert("value".to_string(), value.clone());
        return Some(());
    }
    set_leaf(property, rest, value)
}

fn evaluate_placeholders(
    spec: &mut BackendSpec,
    server_name: &str,
    beautified: &str,
    user_config: &UserConfig,
) {
    let snake: UserConfig = user_config
        .iter()
        .map(|(k, v)| (camel_to_snake(k), v.clone()))
        .collect();
    let mut ctx = JsonMap::new();
    ctx.insert(beautified.to_string(), JsonValue::Object(user_config.clone()));
    ctx.insert(server_name.to_string(), JsonValue::Object(snake));
    let ctx = JsonValue::Object(ctx);

    if !spec.remote.url.is_empty() {
        spec.remote.url = stringify(&evaluate(&spec.remote.url, &ctx));
    }
    spec.command = evaluate_list(&spec.command, &ctx);
    spec.volumes = evaluate_list(&spec.volumes, &ctx);

    for env in &mut spec.env {
        if env.value.contains("{{") && env.value.contains("}}") {
            env.value = stringify(&evaluate(&env.value, &ctx));
        }
    }

    let env_map: EnvMap = spec
        .env
        .iter()
        .map(|e| (e.name.clone(), e.value.clone()))
        .collect();
    for env in &mut spec.env {
        env.value = interpolate_env_vars(&env.value, &env_map);
    }

    for secret in &mut spec.secrets {
        secret.name = stringify(&evaluate(&secret.name, &ctx));
    }

    for value in spec.remote.headers.values_mut() {
        *value = interpolate_env_vars(value, &env_map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Remote, Secret};
    use crate::instructions::Instruction;
    use proptest::prelude::*;
    use serde_json::json;

    fn weather_spec() -> BackendSpec {
        BackendSpec {
            name: "weather-mcp-server".into(),
            image: "mcp/weather".into(),
            command: vec!["--stdio".into()],
            secrets: vec![Secret {
                name: "weather.api_key".into(),
                env: "WEATHER_API_KEY".into(),
            }],
            ..BackendSpec::default()
        }
    }

    fn user_configs(value: JsonValue) -> UserConfigs {
        serde_json::from_value(value).expect("user configs")
    }

    #[test]
    fn weather_secret_lands_in_env_and_nothing_else_changes() {
        let mut catalog = Catalog::default();
        catalog
            .servers
            .insert("weather-mcp-server".into(), weather_spec());
        let mut map = InstructionMap::default();
        map.insert(
            "weather.apiKey",
            Instruction::secret("weather-mcp-server", "WEATHER_API_KEY"),
        );

        merge_user_configs(&mut catalog, &map, &user_configs(json!({"weather": {"apiKey": "xyz"}})))
            .expect("merge");

        let merged = &catalog.servers["weather-mcp-server"];
        assert_eq!(merged.env, vec![EnvVar::new("WEATHER_API_KEY", "xyz")]);
        let mut expected = weather_spec();
        expected.env = merged.env.clone();
        assert_eq!(merged, &expected);
    }

    #[test]
    fn unknown_names_and_keys_are_skipped() {
        let mut catalog = Catalog::default();
        catalog
            .servers
            .insert("weather-mcp-server".into(), weather_spec());
        let mut map = InstructionMap::default();
        map.insert("weather", Instruction::base("weather-mcp-server"));
        map.insert("ghost", Instruction::base("ghost-mcp-server"));
        let before = catalog.clone();

        merge_user_configs(
            &mut catalog,
            &map,
            &user_configs(json!({"nobody": {"x": 1}, "ghost": {"x": 1}, "weather": {"unknown": 1}})),
        )
        .expect("merge");
        assert_eq!(catalog, before);
    }

    #[test]
    fn instruction_for_another_server_is_ignored() {
        let mut spec = weather_spec();
        spec.env.clear();
        let mut map = InstructionMap::default();
        map.insert("weather", Instruction::base("weather-mcp-server"));
        map.insert("weather.apiKey", Instruction::secret("other-server", "X"));
        let mut catalog = Catalog::default();
        catalog.servers.insert("weather-mcp-server".into(), spec);

        merge_user_configs(&mut catalog, &map, &user_configs(json!({"weather": {"apiKey": "v"}})))
            .expect("merge");
        assert!(catalog.servers["weather-mcp-server"].env.is_empty());
    }

    #[test]
    fn structural_errors_abort_the_merge() {
        let mut catalog = Catalog::default();
        catalog
            .servers
            .insert("weather-mcp-server".into(), weather_spec());
        let mut map = InstructionMap::default();
        map.insert("weather.units", Instruction::config("weather-mcp-server", vec![]));

        let err = merge_user_configs(&mut catalog, &map, &user_configs(json!({"weather": {"units": "si"}})))
            .expect_err("empty path");
        assert!(matches!(
            err,
            GatewayError::Merge {
                source: MergeError::EmptyPath { .. },
                ..
            }
        ));

        map.insert(
            "weather.units",
            Instruction {
                server: "weather-mcp-server".into(),
                kind: InstructionKind::Secret,
                env_name: None,
                path: vec![],
            },
        );
        let err = merge_user_configs(&mut catalog, &map, &user_configs(json!({"weather": {"units": "si"}})))
            .expect_err("missing env name");
        assert!(matches!(
            err,
            GatewayError::Merge {
                source: MergeError::MissingEnvName { .. },
                ..
            }
        ));
    }

    #[test]
    fn non_string_secrets_use_json_text() {
        let mut spec = BackendSpec::default();
        apply_secret(&mut spec, "PORT", &json!(8080));
        apply_secret(&mut spec, "FLAGS", &json!(["a", "b"]));
        assert_eq!(spec.env_value("PORT"), Some("8080"));
        assert_eq!(spec.env_value("FLAGS"), Some(r#"["a","b"]"#));
    }

    #[test]
    fn placeholders_and_env_references_resolve_after_merge() {
        let spec = BackendSpec {
            command: vec!["--root".into(), "{{arxiv-mcp-server.storage_path}}".into()],
            volumes: vec!["{{arxiv.storagePath|volume}}".into()],
            env: vec![
                EnvVar::new("STORAGE", "{{arxiv.storagePath}}"),
                EnvVar::new("LITERAL", "{not a template}"),
                EnvVar::new("DERIVED", "${STORAGE}/cache"),
            ],
            remote: Remote {
                url: "https://api.example.com/{{arxiv.region}}/mcp".into(),
                headers: BTreeMap::from([("Authorization".to_string(), "Bearer $API_TOKEN".to_string())]),
                ..Remote::default()
            },
            ..BackendSpec::default()
        };
        let mut catalog = Catalog::default();
        catalog.servers.insert("arxiv-mcp-server".into(), spec);
        let mut map = InstructionMap::default();
        map.insert("arxiv", Instruction::base("arxiv-mcp-server"));
        map.insert(
            "arxiv.apiToken",
            Instruction::secret("arxiv-mcp-server", "API_TOKEN"),
        );

        merge_user_configs(
            &mut catalog,
            &map,
            &user_configs(json!({"arxiv": {"storagePath": "/papers", "region": "eu", "apiToken": "t"}})),
        )
        .expect("merge");

        let merged = &catalog.servers["arxiv-mcp-server"];
        assert_eq!(merged.command, vec!["--root", "/papers"]);
        assert_eq!(merged.volumes, vec!["/papers:/papers"]);
        assert_eq!(merged.env_value("STORAGE"), Some("/papers"));
        assert_eq!(merged.env_value("LITERAL"), Some("{not a template}"));
        assert_eq!(merged.env_value("DERIVED"), Some("/papers/cache"));
        assert_eq!(merged.remote.url, "https://api.example.com/eu/mcp");
        assert_eq!(merged.remote.headers["Authorization"], "Bearer t");
    }

    #[test]
    fn reapplying_config_overwrites_only_the_leaf() {
        let mut spec = BackendSpec::default();
        let path = vec!["url".to_string(), "jdbc".to_string()];
        apply_config(&mut spec, &path, &json!("a"));
        spec.config[0]["properties"]["url"]["properties"]["jdbc"]["description"] = json!("kept");
        apply_config(&mut spec, &path, &json!("b"));
        assert_eq!(
            spec.config[0],
            json!({"properties": {"url": {"properties": {"jdbc": {"value": "b", "description": "kept"}}}}})
        );
    }

    proptest! {
        #[test]
        fn secret_upsert_keeps_one_entry(first in "[a-z]{1,8}", second in "[a-z]{1,8}") {
            let mut spec = BackendSpec::default();
            apply_secret(&mut spec, "TOKEN", &JsonValue::String(first));
            apply_secret(&mut spec, "TOKEN", &JsonValue::String(second.clone()));
            prop_assert_eq!(spec.env.len(), 1);
            prop_assert_eq!(spec.env_value("TOKEN"), Some(second.as_str()));
        }

        #[test]
        fn config_path_creates_exactly_n_levels(path in proptest::collection::vec("[a-z]{1,6}", 1..5), v in 0i64..1000) {
            let mut spec = BackendSpec::default();
            apply_config(&mut spec, &path, &json!(v));

            let mut node = &spec.config[0]["properties"];
            for (depth, key) in path.iter().enumerate() {
                let obj = node.get(key).and_then(JsonValue::as_object).expect("level exists");
                if depth + 1 == path.len() {
                    prop_assert_eq!(obj.get("value"), Some(&json!(v)));
                    prop_assert_eq!(obj.len(), 1);
                } else {
                    prop_assert_eq!(obj.len(), 1);
                    node = &obj["properties"];
                }
            }
        }
    }
}
