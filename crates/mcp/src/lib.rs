//! MCP (Model Context Protocol) over stdio for mcpipe.
//!
//! JSON-RPC 2.0 messages travel as one JSON object per line over a pair of
//! byte streams, normally a child process's stdin/stdout.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **codec**: line framing and message classification
//! - **transport**: frame sources/sinks (stdio, child pipes, in-memory channels)
//! - **supervisor**: spawning and terminating server processes
//! - **server**: MCP server wrapping a `ToolRegistry`
//! - **client**: MCP client session with id correlation and timeouts
//! - **error**: Unified error types
//!
//! # Usage
//!
//! ## Server
//! ```no_run
//! use mcpipe_mcp::server::McpServer;
//! use mcpipe_mcp::transport::StdioTransport;
//! use mcpipe_tool_runtime::builtin_registry;
//!
//! # async fn example() {
//! let registry = builtin_registry(None).unwrap();
//! let mut server = McpServer::new(registry);
//! let mut transport = StdioTransport::stdio();
//! server.run(&mut transport).await.unwrap();
//! # }
//! ```
//!
//! ## Client
//! ```no_run
//! use std::time::Duration;
//! use mcpipe_mcp::client::McpClient;
//! use mcpipe_mcp::supervisor::ServerCommand;
//!
//! # async fn example() {
//! let timeout = Some(Duration::from_secs(5));
//! let client = McpClient::spawn(&ServerCommand::new("mcpipe-server")).unwrap();
//! client.initialize(timeout).await.unwrap();
//! let tools = client.list_tools(timeout).await.unwrap();
//! let outcome = client
//!     .call_tool("hello", serde_json::json!({"name": "Alice"}), timeout)
//!     .await
//!     .unwrap();
//! println!("{} tools, said {:?}", tools.len(), outcome.text());
//! client.shutdown(Duration::from_secs(2)).await.unwrap();
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod server;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use client::{ClientIdentity, McpClient, SessionState, ToolOutcome};
pub use codec::Message;
pub use error::McpError;
pub use server::{McpServer, ServerState};
pub use supervisor::{ServerCommand, ServerProcess, StderrMode};
pub use transport::{
    ChannelTransport, FrameReader, FrameSink, FrameSource, FrameWriter, LineTransport,
    McpTransport, StdioTransport,
};
pub use types::*;
