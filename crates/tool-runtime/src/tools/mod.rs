//! Built-in tool implementations.
//!
//! These are the demo tools a stand-alone tool server exposes out of the box.
//! [`builtin_registry`] builds a registry from all of them or a named subset.

pub mod add;
pub mod current_time;
pub mod echo;
pub mod hello;

pub use add::AddTool;
pub use current_time::CurrentTimeTool;
pub use echo::EchoTool;
pub use hello::HelloTool;

use crate::registry::{RegistryError, ToolRegistry};

/// Names of every built-in tool, in registration order.
pub const BUILTIN_TOOLS: &[&str] = &["hello", "add", "current_time", "echo"];

/// Build a registry holding the built-in tools.
///
/// With `only = None` every built-in is registered; otherwise only the named
/// ones, in the order given.
pub fn builtin_registry(only: Option<&[String]>) -> Result<ToolRegistry, RegistryError> {
    let names: Vec<&str> = match only {
        Some(list) => list.iter().map(String::as_str).collect(),
        None => BUILTIN_TOOLS.to_vec(),
    };

    let mut registry = ToolRegistry::new();
    for name in names {
        match name {
            "hello" => registry.register(HelloTool)?,
            "add" => registry.register(AddTool)?,
            "current_time" => registry.register(CurrentTimeTool)?,
            "echo" => registry.register(EchoTool)?,
            other => return Err(RegistryError::UnknownBuiltin(other.to_string())),
        }
    }
    Ok(registry)
}
