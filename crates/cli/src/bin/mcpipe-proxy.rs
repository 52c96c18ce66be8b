//! mcpipe-proxy: logging relay in front of a stdio MCP server.
//!
//! Looks like a server to whoever launches it, spawns the real server as a
//! child, forwards every line both ways and records it in a traffic log.
//!
//! # Usage
//!
//! ```bash
//! mcpipe-proxy -- mcpipe-server --tools hello
//! mcpipe-proxy --log-file /tmp/mcp.log -- python hello_server.py
//!
//! # Server taken from ~/.config/mcpipe/proxy.toml
//! mcpipe-proxy
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mcpipe_mcp::{FrameReader, FrameWriter};
use mcpipe_proxy::{run_proxy, ProxyConfig, ProxyError};

/// Relay MCP traffic to a child server and log it.
#[derive(Parser, Debug)]
#[command(name = "mcpipe-proxy", version, about)]
struct Cli {
    /// Config file (default: ~/.config/mcpipe/proxy.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Traffic log path (overrides config and MCPIPE_PROXY_LOG).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log frames on one line instead of pretty-printing them.
    #[arg(long)]
    compact: bool,

    /// Do not echo log entries to stderr.
    #[arg(long)]
    quiet: bool,

    /// Milliseconds the server gets to exit after the client disconnects.
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Server command: program followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    mcpipe_cli::init_logging("warn");

    let cli = Cli::parse();
    let mut config =
        ProxyConfig::load(cli.config.as_deref()).context("failed to load proxy configuration")?;
    if let Some(path) = cli.log_file {
        config.log_file = path;
    }
    if cli.compact {
        config.pretty = false;
    }
    if cli.quiet {
        config.mirror_to_stderr = false;
    }
    if let Some(ms) = cli.grace_ms {
        config.shutdown_grace_ms = ms;
    }

    let command = mcpipe_cli::command_from_args(&cli.command)
        .or_else(|| config.server.clone())
        .ok_or(ProxyError::NoServerCommand)
        .context("pass the server command after `--` or set [server] in the config")?;

    let stats = run_proxy(
        &config,
        &command,
        FrameReader::buffered(tokio::io::stdin()),
        FrameWriter::new(tokio::io::stdout()),
    )
    .await
    .with_context(|| format!("proxy for '{}' failed", command.display()))?;

    tracing::info!(
        client_to_server = stats.client_to_server,
        server_to_client = stats.server_to_client,
        server_output = stats.server_output,
        "proxy finished"
    );

    // A stdin read may still be parked on a blocking thread when the server
    // exits first; exit without waiting for it.
    std::process::exit(0)
}
