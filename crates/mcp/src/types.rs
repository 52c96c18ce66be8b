//! JSON-RPC 2.0 and MCP protocol types.
//!
//! Implements the wire format for the Model Context Protocol (MCP), which
//! uses JSON-RPC 2.0 over stdio for communication between clients and servers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use mcpipe_tool_runtime::{ContentBlock, ParamSpec, ParamType, ToolDefinition};

// ── JSON-RPC 2.0 Base Types ─────────────────────────────────────────

/// The `jsonrpc` marker every frame must carry.
pub const JSONRPC_VERSION: &str = "2.0";

/// Keeps an explicit `null` as `Some(Value::Null)` instead of collapsing it
/// to `None`, so that `"result": null` survives a decode/encode cycle.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC request ID. Can be a number or a string.
///
/// Correlation compares variant and value, so `1` and `"1"` are different ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcId::Number(n) => write!(f, "{n}"),
            RpcId::String(s) => write!(f, "\"{s}\""),
        }
    }
}

// ── Standard JSON-RPC error codes ───────────────────────────────────

/// JSON-RPC 2.0 error codes, plus the MCP "not initialized" code.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_NOT_INITIALIZED: i64 = -32002;
}

// ── Method names ────────────────────────────────────────────────────

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const PROMPTS_LIST: &str = "prompts/list";
}

// ── MCP Initialize ──────────────────────────────────────────────────

/// Parameters for the `initialize` MCP method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// Client capabilities advertised during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// Information about the connecting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Result returned from the `initialize` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// Server capabilities advertised during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

/// Tools capability descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Information about the MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// ── MCP tools/list ──────────────────────────────────────────────────

/// Parameters for `tools/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListToolsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Describes a single tool in MCP format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

impl ToolInfo {
    /// Recover the parameter list from `input_schema`.
    ///
    /// Properties whose `type` is missing or unknown are reported as objects.
    pub fn parameters(&self) -> Vec<ParamSpec> {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(properties) = self.input_schema.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };

        properties
            .iter()
            .map(|(name, prop)| {
                let kind = prop
                    .get("type")
                    .cloned()
                    .and_then(|t| serde_json::from_value::<ParamType>(t).ok())
                    .unwrap_or(ParamType::Object);
                ParamSpec {
                    name: name.clone(),
                    kind,
                    required: required.contains(&name.as_str()),
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    default: prop.get("default").cloned(),
                }
            })
            .collect()
    }
}

impl From<ToolDefinition> for ToolInfo {
    fn from(def: ToolDefinition) -> Self {
        let input_schema = def.input_schema();
        Self {
            name: def.name,
            description: def.description,
            input_schema,
        }
    }
}

// ── MCP tools/call ──────────────────────────────────────────────────

/// Parameters for `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text of the first text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }
}

// ── MCP resources/list and prompts/list ─────────────────────────────

/// A resource a server can expose by URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// `resources/list` and `prompts/list` page the same way `tools/list` does.
pub type ListResourcesParams = ListToolsParams;
pub type ListPromptsParams = ListToolsParams;

/// Result of `resources/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt template a server can expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    #[serde(default)]
    pub prompts: Vec<PromptInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ── Helpers ─────────────────────────────────────────────────────────

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: RpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: RpcId, code: i64, message: impl Into<String>) -> Self {
        Self::from_error(
            id,
            JsonRpcError {
                code,
                message: message.into(),
                data: None,
            },
        )
    }

    pub fn from_error(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC 2.0 notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

// ── MCP Protocol version ────────────────────────────────────────────

/// The MCP protocol version this crate implements.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jsonrpc_response_error_shape() {
        let resp = JsonRpcResponse::error(
            RpcId::Number(2),
            error_codes::METHOD_NOT_FOUND,
            "tool not found",
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "tool not found"}})
        );
    }

    #[test]
    fn test_null_result_is_preserved() {
        let parsed: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(parsed.result, Some(Value::Null));
        let parsed: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":1,"message":"x"}}"#)
                .unwrap();
        assert_eq!(parsed.result, None);
    }

    #[test]
    fn test_rpc_id_number_and_string_differ() {
        let n: RpcId = serde_json::from_str("1").unwrap();
        let s: RpcId = serde_json::from_str("\"1\"").unwrap();
        assert_eq!(n, RpcId::Number(1));
        assert_eq!(s, RpcId::String("1".to_string()));
        assert_ne!(n, s);
    }

    #[test]
    fn test_tool_info_from_tool_definition() {
        let def = ToolDefinition::new("echo", "Echo tool")
            .param(ParamSpec::required("message", ParamType::String, "text"));
        let info: ToolInfo = def.into();
        assert_eq!(info.name, "echo");
        assert_eq!(info.description, "Echo tool");
        assert_eq!(info.input_schema["properties"]["message"]["type"], "string");
        assert_eq!(info.input_schema["required"], json!(["message"]));
    }

    #[test]
    fn test_tool_info_parameters_recovered() {
        let def = ToolDefinition::new("hello", "Greets")
            .param(ParamSpec::optional("name", ParamType::String, "who").with_default(json!("World")))
            .param(ParamSpec::required("times", ParamType::Integer, ""));
        let info = ToolInfo::from(def.clone());
        let mut params = info.parameters();
        params.sort_by(|a, b| a.name.cmp(&b.name));
        let mut expected = def.parameters;
        expected.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(params, expected);
    }

    #[test]
    fn test_initialize_params_wire_names() {
        let params: InitializeParams = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "demo-client", "version": "1.0.0"}
        }))
        .unwrap();
        assert_eq!(params.client_info.name, "demo-client");
        assert_eq!(params.client_info.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_call_tool_result_wire_shape() {
        let result = CallToolResult {
            content: vec![ContentBlock::text("Hello, Alice!")],
            is_error: false,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"content": [{"type": "text", "text": "Hello, Alice!"}]})
        );
        assert_eq!(result.first_text(), Some("Hello, Alice!"));

        let failed = CallToolResult {
            is_error: true,
            ..result
        };
        assert_eq!(serde_json::to_value(&failed).unwrap()["isError"], true);
    }

    #[test]
    fn test_list_tools_result_cursor() {
        let parsed: ListToolsResult = serde_json::from_value(json!({
            "tools": [{"name": "echo", "inputSchema": {"type": "object"}}],
            "nextCursor": "page-2"
        }))
        .unwrap();
        assert_eq!(parsed.tools[0].name, "echo");
        assert_eq!(parsed.tools[0].description, "");
        assert_eq!(parsed.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_resource_and_prompt_listings_parse() {
        let resources: ListResourcesResult = serde_json::from_value(json!({
            "resources": [{"uri": "file:///notes.md", "name": "notes", "mimeType": "text/markdown"}]
        }))
        .unwrap();
        assert_eq!(resources.resources[0].mime_type.as_deref(), Some("text/markdown"));
        assert_eq!(resources.resources[0].description, None);

        let prompts: ListPromptsResult = serde_json::from_value(json!({
            "prompts": [{"name": "review", "arguments": [{"name": "code", "required": true}]}]
        }))
        .unwrap();
        assert!(prompts.prompts[0].arguments[0].required);
        assert_eq!(serde_json::to_value(ListPromptsResult::default()).unwrap(), json!({"prompts": []}));
    }
}
