//! Naming helpers shared by the instruction builder and the merger.

/// Convert snake_case or kebab-case into camelCase.
pub fn to_camel_case(s: &str) -> String {
    let normalized = s.replace('-', "_");
    let mut parts = normalized.split('_');
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Convert camelCase into snake_case (the catalog's placeholder convention).
pub fn camel_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, ch) in s.chars().enumerate() {
        if i > 0 && ch.is_ascii_uppercase() {
            out.push('_');
        }
        out.push(ch);
    }
    out.to_lowercase()
}

/// Strip common MCP suffixes/prefixes from a catalog name and camelCase it,
/// e.g. `github-mcp-server` -> `github`, `aws-kb-retrieval-mcp` -> `awsKbRetrieval`.
pub fn beautify_server_name(name: &str) -> String {
    let trimmed = name.strip_suffix("-mcp-server").unwrap_or(name);
    let trimmed = trimmed.strip_suffix("-mcp").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("mcp-").unwrap_or(trimmed);
    to_camel_case(&trimmed.to_lowercase())
}

/// Drop the `<SERVICE>_` prefix from a secret env name:
/// `GITHUB_TOKEN` for service `github` -> `TOKEN`.
pub fn extract_secret_key<'a>(env_name: &'a str, service: &str) -> &'a str {
    let prefix = format!("{}_", service.to_uppercase());
    env_name.strip_prefix(prefix.as_str()).unwrap_or(env_name)
}
