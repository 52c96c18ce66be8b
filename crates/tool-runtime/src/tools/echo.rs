use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolError, ToolResult};

/// Simple echo tool for testing purposes.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("echo", "Echoes back the input message. For testing.").param(
            ParamSpec::required("message", ParamType::String, "The message to echo back"),
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;

        Ok(ToolResult::text(message))
    }
}
