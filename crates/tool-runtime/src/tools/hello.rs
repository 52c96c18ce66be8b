//! Greeting tool, the canonical "hello world" of a tool server.

use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolError, ToolResult};

/// Returns `Hello, {name}!`.
pub struct HelloTool;

#[async_trait]
impl Tool for HelloTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("hello", "Generates a personalised greeting.").param(
            ParamSpec::optional("name", ParamType::String, "Who to greet")
                .with_default(Value::String("World".to_string())),
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let name = input.get("name").and_then(|v| v.as_str()).unwrap_or("World");
        tracing::info!(name = %name, "hello called");
        Ok(ToolResult::text(format!("Hello, {name}!")))
    }
}
