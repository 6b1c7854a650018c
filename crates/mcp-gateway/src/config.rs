//! Optional `<GATEWAY_HOME>/config.toml`.
//!
//! Every value here is a fallback: an explicitly set environment variable
//! always wins, and unset values fall back to the built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct GatewayFileConfig {
    pub logging: Option<LoggingCfg>,
    pub gateway: Option<GatewayCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GatewayCfg {
    pub catalogs: Option<Vec<String>>, // paths or http(s) URLs
    pub mapping: Option<String>,
    pub config_file: Option<String>,
    pub clone_root: Option<String>,
    pub transport: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub concurrency: Option<usize>,
}

pub fn load_file_config(home: &Path) -> anyhow::Result<Option<GatewayFileConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: GatewayFileConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// `$GATEWAY_HOME`, else `$HOME/.mcp-gateway`, else `./.mcp-gateway`.
pub fn gateway_home(explicit: &str) -> PathBuf {
    if !explicit.is_empty() {
        return PathBuf::from(explicit);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".mcp-gateway");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".mcp-gateway")
}

/// Split a comma separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
