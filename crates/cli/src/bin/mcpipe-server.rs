//! mcpipe-server: MCP tool server over stdio.
//!
//! Reads JSON-RPC frames from stdin and writes responses to stdout. All
//! diagnostics go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Every built-in tool
//! mcpipe-server
//!
//! # Only some of them
//! mcpipe-server --tools hello,add
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use mcpipe_mcp::{McpServer, StdioTransport};
use mcpipe_tool_runtime::{builtin_registry, BUILTIN_TOOLS};

/// MCP tool server speaking newline-delimited JSON-RPC on stdio.
#[derive(Parser, Debug)]
#[command(name = "mcpipe-server", version, about)]
struct Cli {
    /// Server name reported in the initialize response.
    #[arg(long, env = "MCPIPE_SERVER_NAME", default_value = "mcpipe-server")]
    name: String,

    /// Comma-separated subset of built-in tools to expose (default: all).
    #[arg(long, env = "MCPIPE_SERVER_TOOLS", value_delimiter = ',')]
    tools: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    mcpipe_cli::init_logging("info");

    let cli = Cli::parse();
    let registry = builtin_registry(cli.tools.as_deref()).with_context(|| {
        format!("invalid --tools (available: {})", BUILTIN_TOOLS.join(", "))
    })?;
    tracing::info!(tools = ?registry.names().collect::<Vec<_>>(), "Server starting...");

    let mut server = McpServer::new(registry).with_name(cli.name);

    let mut transport = StdioTransport::stdio();
    server
        .run(&mut transport)
        .await
        .context("server loop failed")?;

    tracing::info!("Server stopped");
    Ok(())
}
