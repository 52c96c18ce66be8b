use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolError, ToolResult};

/// Integer addition.
pub struct AddTool;

impl AddTool {
    fn operand(input: &Value, key: &str) -> Result<i64, ToolError> {
        input
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::InvalidInput(format!("'{key}' must be an integer")))
    }
}

#[async_trait]
impl Tool for AddTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("add", "Adds two integers.")
            .param(ParamSpec::required("a", ParamType::Integer, "First operand"))
            .param(ParamSpec::required("b", ParamType::Integer, "Second operand"))
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let a = Self::operand(&input, "a")?;
        let b = Self::operand(&input, "b")?;
        let sum = a
            .checked_add(b)
            .ok_or_else(|| ToolError::ExecutionFailed(format!("{a} + {b} overflows")))?;
        Ok(ToolResult::text(sum.to_string()))
    }
}
