//! Tool definitions, registry and built-in tools served by mcpipe servers.

pub mod registry;
pub mod tool;
pub mod tools;

pub use registry::{RegistryError, ToolRegistry};
pub use tool::{
    ContentBlock, FnTool, ParamSpec, ParamType, Tool, ToolDefinition, ToolError,
    ToolResult,
};
pub use tools::{builtin_registry, AddTool, CurrentTimeTool, EchoTool, HelloTool, BUILTIN_TOOLS};
