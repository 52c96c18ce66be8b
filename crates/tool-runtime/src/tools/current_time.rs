use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolError, ToolResult};

/// Reports the local wall-clock time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("current_time", "Returns the current local time.").param(
            ParamSpec::optional("format", ParamType::String, "strftime format string")
                .with_default(Value::String("%Y-%m-%d %H:%M:%S".to_string())),
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let format = input
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("%Y-%m-%d %H:%M:%S");

        let items: Vec<_> = chrono::format::StrftimeItems::new(format).collect();
        if items.iter().any(|i| matches!(i, chrono::format::Item::Error)) {
            return Err(ToolError::InvalidInput(format!("invalid time format '{format}'")));
        }

        let now = chrono::Local::now();
        Ok(ToolResult::text(format!(
            "Current time: {}",
            now.format_with_items(items.into_iter())
        )))
    }
}
