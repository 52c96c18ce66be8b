use std::path::PathBuf;

use mcpipe_mcp::McpError;
use thiserror::Error;

/// Errors that can occur while configuring or running the debug proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open traffic log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no server command given")]
    NoServerCommand,

    #[error(transparent)]
    Mcp(#[from] McpError),
}
