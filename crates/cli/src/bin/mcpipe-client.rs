//! mcpipe-client: demo MCP client.
//!
//! Spawns a server, performs the handshake, lists its tools, resources and
//! prompts, and calls one or more tools. Every step is bounded by `--timeout-secs`.
//!
//! # Usage
//!
//! ```bash
//! mcpipe-client -- mcpipe-server
//! mcpipe-client --call add --args '{"a": 2, "b": 3}' -- mcpipe-server
//!
//! # Through the debug proxy
//! mcpipe-client -- mcpipe-proxy --log-file proxy.log -- mcpipe-server
//! ```

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mcpipe_mcp::{McpClient, ToolOutcome};

/// Connect to a stdio MCP server and exercise its tools.
#[derive(Parser, Debug)]
#[command(name = "mcpipe-client", version, about)]
struct Cli {
    /// Seconds to wait for each response.
    #[arg(long, env = "MCPIPE_CLIENT_TIMEOUT", default_value_t = 5)]
    timeout_secs: u64,

    /// Tool to call; repeat to call several in order.
    #[arg(long = "call", default_value = "hello")]
    calls: Vec<String>,

    /// JSON object of arguments, paired with `--call` by position.
    #[arg(long = "args")]
    arguments: Vec<String>,

    /// Seconds the server gets to exit once the session ends.
    #[arg(long, default_value_t = 2)]
    grace_secs: u64,

    /// Server command: program followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    mcpipe_cli::init_logging("warn");

    let cli = Cli::parse();
    let timeout = Some(Duration::from_secs(cli.timeout_secs));
    let command = mcpipe_cli::command_from_args(&cli.command).context("missing server command")?;

    let calls = cli
        .calls
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let args = match cli.arguments.get(i) {
                Some(raw) => mcpipe_cli::parse_arguments(raw)?,
                None => serde_json::json!({}),
            };
            Ok((name.clone(), args))
        })
        .collect::<Result<Vec<_>>>()?;

    let client = McpClient::spawn(&command).context("failed to start server")?;

    println!("[CLIENT] Initializing...");
    let info = client
        .initialize(timeout)
        .await
        .context("initialize failed")?;
    println!(
        "[CLIENT] Connected: {} {}",
        info.server_info.name,
        info.server_info.version.as_deref().unwrap_or("")
    );

    let tools = client.list_tools(timeout).await.context("tools/list failed")?;
    println!("[CLIENT] Available tools:");
    for tool in &tools {
        println!(" - {}: {}", tool.name, tool.description);
        for param in tool.parameters() {
            println!(
                "     {}: {}{}",
                param.name,
                param.kind.as_str(),
                if param.required { " (required)" } else { "" }
            );
        }
    }

    let resources = client
        .list_resources(timeout)
        .await
        .context("resources/list failed")?;
    println!("[CLIENT] Available resources:");
    if resources.is_empty() {
        println!(" (none)");
    }
    for resource in &resources {
        println!(" - {} ({})", resource.name, resource.uri);
    }

    let prompts = client.list_prompts(timeout).await.context("prompts/list failed")?;
    println!("[CLIENT] Available prompts:");
    if prompts.is_empty() {
        println!(" (none)");
    }
    for prompt in &prompts {
        println!(" - {}: {}", prompt.name, prompt.description.as_deref().unwrap_or(""));
    }

    let mut failures = 0;
    for (name, args) in calls {
        println!("[CLIENT] Calling {name} {args}");
        match client
            .call_tool(&name, args, timeout)
            .await
            .with_context(|| format!("tools/call '{name}' failed"))?
        {
            ToolOutcome::Completed(result) if !result.is_error => {
                for block in &result.content {
                    if let Some(text) = block.as_text() {
                        println!("[CLIENT] Result: {text}");
                    }
                }
            }
            ToolOutcome::Completed(result) => {
                failures += 1;
                println!(
                    "[CLIENT] Tool reported error: {}",
                    result.first_text().unwrap_or_default()
                );
            }
            ToolOutcome::Failed(err) => {
                failures += 1;
                println!("[CLIENT] Error {}: {}", err.code, err.message);
            }
        }
    }

    let status = client
        .shutdown(Duration::from_secs(cli.grace_secs))
        .await
        .context("failed to stop server")?;
    tracing::debug!(?status, "server stopped");
    println!("[CLIENT] Done!");

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
