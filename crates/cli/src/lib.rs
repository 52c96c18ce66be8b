//! Shared startup code for the mcpipe binaries.

use anyhow::{bail, Context, Result};
use mcpipe_mcp::ServerCommand;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Output always goes to stderr: stdout carries protocol frames for the
/// server and the proxy. `RUST_LOG` overrides `default_level`.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

/// Build a server command from trailing `program args...` arguments.
pub fn command_from_args(words: &[String]) -> Option<ServerCommand> {
    let (program, args) = words.split_first()?;
    Some(ServerCommand::new(program.as_str()).args(args.iter().cloned()))
}

/// Parse a `--args` value into a JSON object.
pub fn parse_arguments(raw: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("--args is not valid JSON: {raw}"))?;
    if !value.is_object() {
        bail!("--args must be a JSON object, got {value}");
    }
    Ok(value)
}
