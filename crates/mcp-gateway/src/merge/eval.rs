//! `{{path.to.value|filter}}` placeholder evaluation on minijinja.
//!
//! A string that is exactly one placeholder evaluates to the raw value, so a
//! list-valued setting can expand into several command or volume entries.
//! Mixed strings substitute the string form of each placeholder. Unresolved
//! placeholders evaluate to nothing.
//!
//! Backend keys contain hyphens, which jinja reads as subtraction, so each
//! dotted path is rewritten into quoted subscripts before compiling.

use minijinja::value::{Value, ValueKind};
use minijinja::{Environment, UndefinedBehavior, context};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.add_filter("volume", volume);
    env
});

/// Render a JSON value the way it appears inside a string.
pub fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `path` becomes `path:path`; lists map element-wise.
fn volume(value: Value) -> Value {
    if let Some(path) = value.as_str() {
        if path.is_empty() {
            return value;
        }
        return Value::from(format!("{path}:{path}"));
    }
    if value.kind() == ValueKind::Seq
        && let Ok(items) = value.try_iter()
    {
        return Value::from(items.map(volume).collect::<Vec<_>>());
    }
    value
}

/// `a-b.c | volume` to `ctx["a-b"]["c"] | volume`.
fn to_jinja(expr: &str) -> String {
    let (path, filters) = match expr.split_once('|') {
        Some((path, filters)) => (path, Some(filters.trim())),
        None => (expr, None),
    };
    let mut out = String::from("ctx");
    for segment in path.trim().split('.') {
        let quoted = serde_json::to_string(segment.trim())
            .unwrap_or_else(|_| String::from("\"\""));
        out.push('[');
        out.push_str(&quoted);
        out.push(']');
    }
    if let Some(filters) = filters {
        out.push_str(" | ");
        out.push_str(filters);
    }
    out
}

fn evaluate_expression(expr: &str, ctx: &JsonValue) -> JsonValue {
    let source = to_jinja(expr);
    let evaluated = TEMPLATES
        .compile_expression(&source)
        .and_then(|compiled| compiled.eval(context! { ctx => Value::from_serialize(ctx) }));
    match evaluated {
        Ok(value) if value.is_undefined() || value.is_none() => JsonValue::Null,
        Ok(value) => serde_json::to_value(&value).unwrap_or(JsonValue::Null),
        Err(e) => {
            tracing::warn!("template expression '{}' failed: {}", expr.trim(), e);
            JsonValue::Null
        }
    }
}

fn single_expression(template: &str) -> Option<&str> {
    let inner = template.strip_prefix("{{")?.strip_suffix("}}")?;
    (!inner.contains("{{") && !inner.contains("}}")).then_some(inner)
}

/// Evaluate one template against the context.
pub fn evaluate(template: &str, ctx: &JsonValue) -> JsonValue {
    if let Some(expr) = single_expression(template) {
        return evaluate_expression(expr, ctx);
    }
    if !template.contains("{{") {
        return JsonValue::String(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len;
        out.push_str(&rest[..start]);
        out.push_str(&stringify(&evaluate_expression(&rest[start + 2..end], ctx)));
        rest = &rest[end + 2..];
    }
    out.push_str(rest);
    JsonValue::String(out)
}

/// Evaluate each template, expanding list values and dropping empty results.
pub fn evaluate_list(templates: &[String], ctx: &JsonValue) -> Vec<String> {
    let mut out = Vec::with_capacity(templates.len());
    for template in templates {
        match evaluate(template, ctx) {
            JsonValue::Array(items) => out.extend(
                items
                    .iter()
                    .map(stringify)
                    .filter(|item| !item.is_empty()),
            ),
            value => {
                let s = stringify(&value);
                if !s.is_empty() {
                    out.push(s);
                }
            }
        }
    }
    out
}
