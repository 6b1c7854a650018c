mod catalog;
mod cli;
mod config;
mod discovery;
mod error;
mod gateway;
mod handler;
mod instructions;
mod merge;
mod naming;
mod pool;
mod pull;
mod registry;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use env_flags::env_flags;
use once_cell::sync::OnceCell;
use rust_mcp_sdk::mcp_server::{
    HyperServerOptions, ServerRuntime, hyper_server_core, server_runtime_core,
};
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION, ServerCapabilities,
    ServerCapabilitiesTools,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};

use crate::catalog::{Catalog, read_catalogs};
use crate::cli::{Cli, Commands};
use crate::config::{GatewayCfg, GatewayFileConfig, LoggingCfg};
use crate::gateway::Gateway;
use crate::handler::GatewayHandler;
use crate::instructions::{InstructionMap, build_instructions, combined_schema};
use crate::merge::UserConfigs;
use crate::pool::SessionPool;
use crate::transport::{ClientIdentity, Transports};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

fn file_writer(dir: &Path) -> Option<tracing_appender::non_blocking::NonBlocking> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!("failed to create log dir {}: {}", dir.display(), e);
        return None;
    }
    let appender = tracing_appender::rolling::daily(dir, "mcp-gateway.log");
    let (nb, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Some(nb)
}

fn init_tracing(home: &Path, logging: Option<&LoggingCfg>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true).
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to file under <GATEWAY_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = true;
        /// Optional explicit log directory (absolute). Defaults to <GATEWAY_HOME>/logs
        LOG_DIR: &str = "";
    }

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, prelude::*};

    let env_set = |k: &str| std::env::var_os(k).is_some();

    let mut rust_log = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else {
        (*RUST_LOG).to_string()
    };
    let mut tracing_json = *TRACING_JSON;
    let mut tracing_compact = *TRACING_COMPACT;
    let mut tracing_pretty = *TRACING_PRETTY;
    let mut log_to_file = *LOG_TO_FILE;
    let mut log_dir: Option<PathBuf> = if !(*LOG_DIR).is_empty() {
        Some(PathBuf::from((*LOG_DIR).to_string()))
    } else {
        None
    };

    if let Some(cfg) = logging {
        if !(env_set("TRACING_FILTER") || env_set("RUST_LOG"))
            && let Some(level) = cfg.level.as_ref()
        {
            rust_log = level.clone();
        }
        if !env_set("TRACING_JSON")
            && let Some(v) = cfg.json
        {
            tracing_json = v;
        }
        if !env_set("TRACING_COMPACT")
            && let Some(v) = cfg.compact
        {
            tracing_compact = v;
        }
        if !env_set("TRACING_PRETTY")
            && let Some(v) = cfg.pretty
        {
            tracing_pretty = v;
        }
        if !env_set("LOG_TO_FILE")
            && let Some(v) = cfg.to_file
        {
            log_to_file = v;
        }
        if !env_set("LOG_DIR")
            && let Some(dir) = cfg.dir.as_ref()
        {
            log_dir = Some(config::expand_home(dir));
        }
    }

    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout carries the stdio JSON-RPC stream.
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);
    let file = if log_to_file {
        file_writer(&log_dir.unwrap_or_else(|| home.join("logs")))
    } else {
        None
    };
    macro_rules! file_layer {
        ($nb:expr) => {
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .with_target(true)
                .with_ansi(false)
                .with_writer($nb)
        };
    }
    let reg = tracing_subscriber::registry().with(filter);

    let installed = if tracing_json {
        reg.with(base.json())
            .with(file.map(|nb| file_layer!(nb).json()))
            .try_init()
    } else if tracing_compact {
        reg.with(base.compact())
            .with(file.map(|nb| file_layer!(nb).compact()))
            .try_init()
    } else if tracing_pretty {
        reg.with(base.pretty())
            .with(file.map(|nb| file_layer!(nb).pretty()))
            .try_init()
    } else {
        reg.with(base).with(file.map(|nb| file_layer!(nb))).try_init()
    };
    if let Err(e) = installed {
        tracing::debug!("tracing already set: {:?}", e);
    }
}

/// Resolved process settings.
struct Settings {
    catalogs: Vec<String>,
    mapping: Option<PathBuf>,
    inline_config: String,
    config_file: Option<PathBuf>,
    clone_root: PathBuf,
    transport: String,
    host: String,
    port: u16,
    ping: Duration,
    http_json: bool,
    concurrency: usize,
}

// Inline config carries secrets; only its presence is logged.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inline_config = if self.inline_config.trim().is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Settings")
            .field("catalogs", &self.catalogs)
            .field("mapping", &self.mapping)
            .field("inline_config", &inline_config)
            .field("config_file", &self.config_file)
            .field("clone_root", &self.clone_root)
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ping", &self.ping)
            .field("http_json", &self.http_json)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Settings {
    /// Env wins, else config file, else defaults.
    fn resolve(home: &Path, file: Option<&GatewayCfg>) -> Self {
        env_flags! {
            /// Catalog sources (comma-separated paths or http(s) URLs)
            GATEWAY_CATALOGS: &str = "/etc/mcp-gateway/docker-catalog.yaml";
            /// Instruction map file. If empty, the map is built from the catalog.
            GATEWAY_MAPPING: &str = "";
            /// Inline user configuration JSON
            GATEWAY_CONFIG: &str = "";
            /// User configuration file; reloaded on SIGHUP
            GATEWAY_CONFIG_FILE: &str = "";
            /// Parent directory for source-repository clones. Defaults to <GATEWAY_HOME>/sources
            GATEWAY_CLONE_ROOT: &str = "";
            /// Transport: "stdio" (default) or "http"
            TRANSPORT: &str = "stdio";
            /// Host for HTTP transport
            HOST: &str = "127.0.0.1";
            /// Port for HTTP transport
            PORT: u16 = 50005;
            /// Ping interval for HTTP SSE
            PING_SECS: u64 = 5;
            /// Enable JSON response mode for HTTP
            HTTP_JSON: bool = false;
            /// Max concurrent backend discoveries; 0 means twice the CPU count
            GATEWAY_CONCURRENCY: usize = 0;
        }

        let env_set = |k: &str| std::env::var_os(k).is_some();
        let path = |raw: &str| (!raw.is_empty()).then(|| config::expand_home(raw));

        let catalogs = match file.and_then(|g| g.catalogs.clone()) {
            Some(list) if !env_set("GATEWAY_CATALOGS") => list,
            _ => config::split_list(*GATEWAY_CATALOGS),
        };
        let mapping = match file.and_then(|g| g.mapping.as_deref()) {
            Some(m) if !env_set("GATEWAY_MAPPING") => path(m),
            _ => path(*GATEWAY_MAPPING),
        };
        let config_file = match file.and_then(|g| g.config_file.as_deref()) {
            Some(c) if !env_set("GATEWAY_CONFIG_FILE") => path(c),
            _ => path(*GATEWAY_CONFIG_FILE),
        };
        let clone_root = match file.and_then(|g| g.clone_root.as_deref()) {
            Some(c) if !env_set("GATEWAY_CLONE_ROOT") => path(c),
            _ => path(*GATEWAY_CLONE_ROOT),
        }
        .unwrap_or_else(|| home.join("sources"));
        let transport = match file.and_then(|g| g.transport.clone()) {
            Some(t) if !env_set("TRANSPORT") => t,
            _ => (*TRANSPORT).to_string(),
        };
        let host = match file.and_then(|g| g.host.clone()) {
            Some(h) if !env_set("HOST") => h,
            _ => (*HOST).to_string(),
        };
        let port = match file.and_then(|g| g.port) {
            Some(p) if !env_set("PORT") => p,
            _ => *PORT,
        };
        let concurrency = match file.and_then(|g| g.concurrency) {
            Some(c) if !env_set("GATEWAY_CONCURRENCY") => c,
            _ => *GATEWAY_CONCURRENCY,
        };

        Self {
            catalogs,
            mapping,
            inline_config: (*GATEWAY_CONFIG).to_string(),
            config_file,
            clone_root,
            transport,
            host,
            port,
            ping: Duration::from_secs(*PING_SECS),
            http_json: *HTTP_JSON,
            concurrency: if concurrency == 0 {
                discovery::default_concurrency()
            } else {
                concurrency
            },
        }
    }

    fn instructions(&self, catalog: &Catalog) -> anyhow::Result<InstructionMap> {
        match &self.mapping {
            Some(path) => InstructionMap::load(path),
            None => {
                let built = build_instructions(catalog);
                tracing::info!(
                    "built instruction map from catalog (entries={})",
                    built.instructions.len()
                );
                Ok(built.instructions)
            }
        }
    }

    /// Inline config wins over the config file.
    async fn user_configs(&self) -> anyhow::Result<UserConfigs> {
        if !self.inline_config.trim().is_empty() {
            return Ok(Gateway::parse_user_configs(&self.inline_config)?);
        }
        match &self.config_file {
            Some(path) => read_user_configs(path).await,
            None => Ok(UserConfigs::new()),
        }
    }
}

async fn read_user_configs(path: &Path) -> anyhow::Result<UserConfigs> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read user config {}", path.display()))?;
    Gateway::parse_user_configs(&raw).with_context(|| format!("parse user config {}", path.display()))
}

/// Write the combined schema and the instruction map for the loaded catalog.
async fn generate(settings: &Settings, schema_out: &Path, mapping_out: &Path) -> anyhow::Result<()> {
    let catalog = read_catalogs(&settings.catalogs).await?;
    let built = build_instructions(&catalog);
    let schema = serde_json::to_string_pretty(&combined_schema(&built.services))?;
    tokio::fs::write(schema_out, schema)
        .await
        .with_context(|| format!("write schema {}", schema_out.display()))?;
    tokio::fs::write(mapping_out, built.instructions.to_json_pretty()?)
        .await
        .with_context(|| format!("write instruction map {}", mapping_out.display()))?;
    tracing::info!(
        "generated schema (services={}) and instruction map (entries={})",
        built.services.len(),
        built.instructions.len()
    );
    Ok(())
}

/// Re-read the config file on every SIGHUP and reload the gateway with it.
fn spawn_reload_on_hangup(gateway: Arc<Gateway>, path: PathBuf) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received; reloading {}", path.display());
            let configs = match read_user_configs(&path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("reload skipped: {:#}", e);
                    continue;
                }
            };
            if let Err(e) = gateway.load_config(configs).await {
                tracing::error!("reload failed; keeping previous configuration: {}", e);
            }
        }
    });
    Ok(())
}

fn server_details() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: "mcp-gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("MCP Gateway".to_string()),
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(
            "Tools are named <backend>-<tool> and forwarded to the backend that provides them."
                .to_string(),
        ),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

async fn run_server(settings: &Settings, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let handler = GatewayHandler::new(gateway);
    if settings.transport == "stdio" {
        let transport = StdioTransport::new(TransportOptions::default())
            .map_err(|e| anyhow::anyhow!("stdio transport: {e}"))?;
        let server: ServerRuntime =
            server_runtime_core::create_server(server_details(), transport, handler);
        tracing::info!("starting stdio server");
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("server runtime error: {}", msg);
        }
    } else {
        let server = hyper_server_core::create_server(
            server_details(),
            handler,
            HyperServerOptions {
                host: settings.host.clone(),
                port: settings.port,
                ping_interval: settings.ping,
                enable_json_response: Some(settings.http_json),
                ..Default::default()
            },
        );
        tracing::info!(
            "http server configured; starting listener on {}:{} (json={})",
            settings.host,
            settings.port,
            settings.http_json
        );
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("hyper server error: {}", msg);
        }
    }
    Ok(())
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let catalog = read_catalogs(&settings.catalogs).await?;
    let instructions = settings.instructions(&catalog)?;
    if instructions.is_empty() {
        tracing::warn!("instruction map is empty; user configuration will not resolve");
    }
    tracing::info!(
        "catalog ready (servers={}, instructions={})",
        catalog.servers.len(),
        instructions.len()
    );

    let factory = Arc::new(Transports::new(settings.clone_root.clone()));
    let pool = Arc::new(SessionPool::new(factory, ClientIdentity::default()));
    let gateway = Gateway::new(catalog, instructions, pool, settings.concurrency);

    match settings.user_configs().await {
        Ok(configs) => {
            if let Err(e) = gateway.load_config(configs).await {
                tracing::error!("initial configuration rejected: {}", e);
            }
        }
        Err(e) => tracing::error!("initial configuration unreadable: {:#}", e),
    }
    if let Some(path) = settings.config_file.clone() {
        spawn_reload_on_hangup(gateway.clone(), path)?;
    }

    tokio::select! {
        served = run_server(&settings, gateway.clone()) => served?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
    }

    if let Err(e) = gateway.shutdown().await {
        tracing::warn!("closing backend sessions: {}", e);
    }
    tracing::info!("server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_flags! {
        /// Gateway home directory (absolute). Defaults to $HOME/.mcp-gateway
        GATEWAY_HOME: &str = "";
    }
    let home = config::gateway_home(*GATEWAY_HOME);
    let file_cfg = match config::load_file_config(&home) {
        Ok(cfg) => cfg.unwrap_or_default(),
        Err(e) => {
            eprintln!("ignoring unreadable {}/config.toml: {e:#}", home.display());
            GatewayFileConfig::default()
        }
    };
    init_tracing(&home, file_cfg.logging.as_ref());
    let settings = Settings::resolve(&home, file_cfg.gateway.as_ref());
    tracing::debug!("settings: {:?}", settings);

    match cli.command {
        Some(Commands::Pull { names }) => {
            let catalog = read_catalogs(&settings.catalogs).await?;
            let instructions = settings.instructions(&catalog)?;
            pull::pull_images(&catalog, &instructions, &names).await
        }
        Some(Commands::Generate {
            schema_out,
            mapping_out,
        }) => generate(&settings, &schema_out, &mapping_out).await,
        None => {
            tracing::info!("starting mcp-gateway (transport={})", settings.transport);
            serve(settings).await
        }
    }
}
