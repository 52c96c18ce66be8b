use crate::tool::{FnTool, Tool, ToolDefinition, ToolError};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// Manages available tools, their schemas, and lookup.
///
/// Built once at startup and handed to a server by value; listing order
/// follows registration order.
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool. Returns error if name already registered.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let def = tool.definition();
        if def.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.tools.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        tracing::debug!(tool = %def.name, "registered tool");
        self.tools.insert(def.name, Arc::new(tool));
        Ok(())
    }

    /// Register a plain function as a tool.
    pub fn register_fn<F>(&mut self, definition: ToolDefinition, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(Value) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        self.register(FnTool::new(definition, handler))
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool definitions.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
    #[error("Tool name must not be empty")]
    EmptyName,
    #[error("Unknown built-in tool '{0}'")]
    UnknownBuiltin(String),
}
