//! Error types for merging, transports, sessions and the gateway surface.

use thiserror::Error;

/// Structural problems found while applying user configuration.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("secret instruction {key} has no env name")]
    MissingEnvName { key: String },

    #[error("config instruction {key} has an empty path")]
    EmptyPath { key: String },

    #[error("instruction {key} has no applicable type")]
    UnsupportedInstruction { key: String },
}

/// Failure to bring up a backend session, named by stage.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("pull {image}: {reason}")]
    Pull { image: String, reason: String },

    #[error("clone {repo}: {reason}")]
    Clone { repo: String, reason: String },

    #[error("install {repo}: {reason}")]
    Install { repo: String, reason: String },

    #[error("connect {server}: {reason}")]
    Connect { server: String, reason: String },

    #[error("{server}: {reason}")]
    InvalidDescriptor { server: String, reason: String },

    #[error("{server}: unsupported remote transport type '{transport}'")]
    UnsupportedRemote { server: String, transport: String },
}

/// Failure of a request on an already open session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{method} on {server} failed: {reason}")]
    Request {
        server: String,
        method: &'static str,
        reason: String,
    },

    #[error("session for {0} is closed")]
    Closed(String),
}

/// Errors surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid user configuration: {0}")]
    InvalidConfig(String),

    #[error("merge failed for {server}: {source}")]
    Merge {
        server: String,
        #[source]
        source: MergeError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
