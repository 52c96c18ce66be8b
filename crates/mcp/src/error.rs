//! Error types for the MCP crate.

use std::time::Duration;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to serialize or parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A single frame could not be decoded. Never fatal to the transport.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The peer went away (EOF, closed pipe, exited process).
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The initialize exchange did not complete.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Server/client not initialized.
    #[error("Not initialized: call initialize first")]
    NotInitialized,

    /// A second `initialize` arrived after the handshake completed.
    #[error("Already initialized")]
    AlreadyInitialized,

    /// No response arrived within the caller's deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered a request with a JSON-RPC error object.
    #[error("Server returned error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters for a method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The requested tool was not found in the registry.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed.
    #[error("{0}")]
    ToolExecution(String),

    /// The server process could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The MCP server process exited or is unavailable.
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),
}

impl McpError {
    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let (code, message, data) = match self {
            McpError::JsonParse(_) => (error_codes::PARSE_ERROR, self.to_string(), None),
            McpError::MalformedMessage(_) => (error_codes::INVALID_REQUEST, self.to_string(), None),
            McpError::AlreadyInitialized => (error_codes::INVALID_REQUEST, self.to_string(), None),
            McpError::NotInitialized => (
                error_codes::SERVER_NOT_INITIALIZED,
                "server not initialized".to_string(),
                None,
            ),
            McpError::MethodNotFound(_) => (error_codes::METHOD_NOT_FOUND, self.to_string(), None),
            McpError::ToolNotFound(name) => (
                error_codes::METHOD_NOT_FOUND,
                "tool not found".to_string(),
                Some(serde_json::json!({ "name": name })),
            ),
            McpError::InvalidParams(_) => (error_codes::INVALID_PARAMS, self.to_string(), None),
            McpError::Rpc(err) => return err.clone(),
            _ => (error_codes::INTERNAL_ERROR, self.to_string(), None),
        };
        JsonRpcError {
            code,
            message,
            data,
        }
    }

    /// Whether this error means the peer is gone and no further request can
    /// be answered on this connection.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            McpError::ConnectionLost(_) | McpError::Transport(_) | McpError::ServerUnavailable(_)
        )
    }
}
