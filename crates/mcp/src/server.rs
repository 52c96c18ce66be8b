//! MCP server implementation.
//!
//! Wraps a `ToolRegistry` and exposes its tools over the MCP protocol.
//! Requests are handled one at a time: read, dispatch, write, repeat.
//!
//! Lifecycle: `WaitingForInit` until the client has both sent `initialize`
//! and followed it with `notifications/initialized`, then `Ready`, then
//! `ShuttingDown` once the input stream ends.

use serde_json::Value;

use mcpipe_tool_runtime::ToolRegistry;

use crate::codec::Message;
use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    WaitingForInit,
    Ready,
    ShuttingDown,
}

/// MCP server that bridges a `ToolRegistry` to MCP clients.
pub struct McpServer {
    registry: ToolRegistry,
    server_name: String,
    server_version: String,
    state: ServerState,
    /// Set once `initialize` has been answered.
    client: Option<InitializeParams>,
}

impl McpServer {
    /// Create a new MCP server wrapping the given tool registry.
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            server_name: "mcpipe-server".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            state: ServerState::WaitingForInit,
            client: None,
        }
    }

    /// Set the server name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Client info captured from `initialize`, if it has arrived.
    pub fn client_info(&self) -> Option<&ClientInfo> {
        self.client.as_ref().map(|c| &c.client_info)
    }

    /// Run the server loop, reading from and writing to the transport.
    ///
    /// Processes messages until the transport is closed. Malformed lines and
    /// stray responses are logged and skipped; only transport failures end
    /// the loop with an error.
    pub async fn run<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, tools = self.registry.len(), "MCP server starting");

        loop {
            let message = match transport.read_frame().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::info!("Transport closed, shutting down");
                    self.state = ServerState::ShuttingDown;
                    break;
                }
                Err(McpError::MalformedMessage(reason)) => {
                    tracing::warn!(%reason, "Skipping malformed frame");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match message {
                Message::Request(request) => {
                    tracing::debug!(id = %request.id, method = %request.method, "Received request");
                    let response = self.handle_request(&request).await;
                    transport.write_frame(&Message::Response(response)).await?;
                }
                Message::Notification(notif) => self.handle_notification(&notif),
                Message::Response(resp) => {
                    tracing::warn!(id = %resp.id, "Dropping unexpected response from client");
                }
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let result = match (self.state, request.method.as_str()) {
            (ServerState::WaitingForInit, methods::INITIALIZE) => {
                self.handle_initialize(&request.params)
            }
            (ServerState::WaitingForInit, method) => {
                tracing::warn!(method = %method, "Request before initialization completed");
                Err(McpError::NotInitialized)
            }
            (ServerState::Ready, methods::INITIALIZE) => Err(McpError::AlreadyInitialized),
            (ServerState::Ready, methods::PING) => Ok(serde_json::json!({})),
            (ServerState::Ready, methods::TOOLS_LIST) => self.handle_list_tools(),
            (ServerState::Ready, methods::TOOLS_CALL) => self.handle_call_tool(&request.params).await,
            (ServerState::Ready, methods::RESOURCES_LIST) => {
                empty_listing(ListResourcesResult::default())
            }
            (ServerState::Ready, methods::PROMPTS_LIST) => empty_listing(ListPromptsResult::default()),
            (ServerState::Ready, method) => {
                tracing::warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method.to_string()))
            }
            (ServerState::ShuttingDown, _) => {
                Err(McpError::ServerUnavailable("server is shutting down".to_string()))
            }
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::from_error(id, e.to_rpc_error()),
        }
    }

    /// Handle a notification. Notifications never produce a response.
    pub fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            methods::INITIALIZED => match (self.state, &self.client) {
                (ServerState::WaitingForInit, Some(_)) => {
                    tracing::info!("Client confirmed initialization");
                    self.state = ServerState::Ready;
                }
                (ServerState::WaitingForInit, None) => {
                    tracing::warn!("initialized notification before initialize, ignoring");
                }
                _ => tracing::debug!("Duplicate initialized notification, ignoring"),
            },
            methods::CANCELLED => {
                // Requests are answered before the next frame is read, so
                // there is never anything left to cancel.
                tracing::debug!("Client cancelled a request");
            }
            method => {
                tracing::debug!(method = %method, "Unknown notification, ignoring");
            }
        }
    }

    fn handle_initialize(&mut self, params: &Option<Value>) -> Result<Value, McpError> {
        let params: InitializeParams = params
            .clone()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| McpError::InvalidParams(e.to_string()))
            })?;

        tracing::info!(
            client = %params.client_info.name,
            version = ?params.client_info.version,
            protocol = %params.protocol_version,
            "Handling initialize"
        );
        if params.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                requested = %params.protocol_version,
                supported = PROTOCOL_VERSION,
                "Client requested a different protocol version"
            );
        }
        self.client = Some(params);

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        };

        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_tools(&self) -> Result<Value, McpError> {
        tracing::debug!("Handling tools/list");

        let tools: Vec<ToolInfo> = self.registry.list().into_iter().map(ToolInfo::from).collect();
        let result = ListToolsResult {
            tools,
            next_cursor: None,
        };

        Ok(serde_json::to_value(result)?)
    }

    async fn handle_call_tool(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let params = params
            .clone()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
        let call_params: CallToolParams =
            serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;

        tracing::debug!(tool = %call_params.name, "Handling tools/call");

        let tool = self
            .registry
            .get(&call_params.name)
            .ok_or_else(|| McpError::ToolNotFound(call_params.name.clone()))?;

        let arguments = tool
            .definition()
            .validate(call_params.arguments)
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        // Run on its own task so a panicking handler is reported, not fatal.
        // It is awaited right away, keeping one call in flight at a time.
        let handle = tokio::spawn(async move { tool.execute(arguments).await });
        let tool_result = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(tool = %call_params.name, error = %e, "Tool failed");
                return Err(McpError::ToolExecution(e.to_string()));
            }
            Err(join_err) => {
                tracing::error!(tool = %call_params.name, error = %join_err, "Tool handler panicked");
                return Err(McpError::ToolExecution(format!(
                    "tool '{}' panicked",
                    call_params.name
                )));
            }
        };

        let result = CallToolResult {
            content: tool_result.content,
            is_error: tool_result.is_error,
        };

        Ok(serde_json::to_value(result)?)
    }
}

/// Resources and prompts are advertised as empty so generic clients that
/// ask for them get a well-formed answer instead of `method not found`.
fn empty_listing<T: serde::Serialize>(listing: T) -> Result<Value, McpError> {
    Ok(serde_json::to_value(listing)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, FrameSink, FrameSource};
    use async_trait::async_trait;
    use mcpipe_tool_runtime::{
        HelloTool, Tool, ToolDefinition, ToolError, ToolResult,
    };
    use serde_json::json;

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("explode", "Always panics")
        }

        async fn execute(&self, _input: Value) -> Result<ToolResult, ToolError> {
            panic!("kaboom");
        }
    }

    fn test_registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(HelloTool).unwrap();
        reg.register(PanicTool).unwrap();
        reg.register_fn(ToolDefinition::new("fail", "Always fails"), |_| {
            Err(ToolError::ExecutionFailed("disk on fire".to_string()))
        })
        .unwrap();
        reg
    }

    fn initialize_request(id: i64) -> JsonRpcRequest {
        JsonRpcRequest::new(
            RpcId::Number(id),
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            })),
        )
    }

    fn call(id: i64, name: &str, arguments: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(
            RpcId::Number(id),
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        )
    }

    async fn ready_server() -> McpServer {
        let mut server = McpServer::new(test_registry());
        let resp = server.handle_request(&initialize_request(1)).await;
        assert!(resp.error.is_none());
        server.handle_notification(&JsonRpcNotification::new("notifications/initialized", None));
        assert_eq!(server.state(), ServerState::Ready);
        server
    }

    #[tokio::test]
    async fn test_handle_initialize() {
        let mut server = McpServer::new(test_registry());
        let resp = server.handle_request(&initialize_request(1)).await;
        assert!(resp.error.is_none());
        let result: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "mcpipe-server");
        assert_eq!(server.client_info().unwrap().name, "test-client");
        // Still waiting for the initialized notification.
        assert_eq!(server.state(), ServerState::WaitingForInit);
    }

    #[tokio::test]
    async fn test_initialize_without_params() {
        let mut server = McpServer::new(test_registry());
        let req = JsonRpcRequest::new(RpcId::Number(1), "initialize", None);
        let resp = server.handle_request(&req).await;
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
        assert_eq!(server.state(), ServerState::WaitingForInit);
    }

    #[tokio::test]
    async fn test_requests_before_handshake_completes() {
        let mut server = McpServer::new(test_registry());

        let list = JsonRpcRequest::new(RpcId::Number(1), "tools/list", None);
        let resp = server.handle_request(&list).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::SERVER_NOT_INITIALIZED);
        assert_eq!(err.message, "server not initialized");

        // initialize answered, but no initialized notification yet
        server.handle_request(&initialize_request(2)).await;
        let resp = server.handle_request(&call(3, "hello", json!({"name": "Alice"}))).await;
        assert_eq!(resp.error.unwrap().code, error_codes::SERVER_NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn test_initialized_before_initialize_is_ignored() {
        let mut server = McpServer::new(test_registry());
        server.handle_notification(&JsonRpcNotification::new("notifications/initialized", None));
        assert_eq!(server.state(), ServerState::WaitingForInit);
    }

    #[tokio::test]
    async fn test_reinitialize_rejected() {
        let mut server = ready_server().await;
        let resp = server.handle_request(&initialize_request(9)).await;
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_REQUEST);
        assert_eq!(server.state(), ServerState::Ready);
    }

    #[tokio::test]
    async fn test_handle_list_tools() {
        let mut server = ready_server().await;
        let req = JsonRpcRequest::new(RpcId::Number(2), "tools/list", Some(json!({})));
        let resp = server.handle_request(&req).await;
        let result: ListToolsResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        let names: Vec<&str> = result.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["hello", "explode", "fail"]);
        assert_eq!(result.tools[0].input_schema["properties"]["name"]["type"], "string");
    }

    #[tokio::test]
    async fn test_resources_and_prompts_are_empty() {
        let mut server = ready_server().await;
        let req = JsonRpcRequest::new(RpcId::Number(2), "resources/list", Some(json!({})));
        let resp = server.handle_request(&req).await;
        assert_eq!(resp.result, Some(json!({"resources": []})));

        let req = JsonRpcRequest::new(RpcId::Number(3), "prompts/list", None);
        let resp = server.handle_request(&req).await;
        assert_eq!(resp.result, Some(json!({"prompts": []})));

        let mut fresh = McpServer::new(test_registry());
        let resp = fresh.handle_request(&req).await;
        assert_eq!(resp.error.unwrap().code, error_codes::SERVER_NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn test_handle_call_tool() {
        let mut server = ready_server().await;
        let resp = server.handle_request(&call(3, "hello", json!({"name": "Alice"}))).await;
        assert_eq!(resp.id, RpcId::Number(3));
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("Hello, Alice!"));
    }

    #[tokio::test]
    async fn test_handle_call_tool_not_found() {
        let mut server = ready_server().await;
        let resp = server.handle_request(&call(4, "does_not_exist", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(err.message, "tool not found");
    }

    #[tokio::test]
    async fn test_handle_call_tool_invalid_arguments() {
        let mut server = ready_server().await;
        let resp = server.handle_request(&call(5, "hello", json!({"name": 42}))).await;
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);

        let missing_name = JsonRpcRequest::new(RpcId::Number(6), "tools/call", Some(json!({})));
        let resp = server.handle_request(&missing_name).await;
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handler_errors_become_internal_errors() {
        let mut server = ready_server().await;

        let resp = server.handle_request(&call(7, "fail", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        assert!(err.message.contains("disk on fire"));

        let resp = server.handle_request(&call(8, "explode", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        assert!(err.message.contains("explode"));

        // Still serving after a panic.
        let resp = server.handle_request(&call(9, "hello", json!({}))).await;
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_handle_unknown_method_and_ping() {
        let mut server = ready_server().await;
        let resp = server
            .handle_request(&JsonRpcRequest::new(RpcId::Number(5), "unknown/method", None))
            .await;
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let resp = server
            .handle_request(&JsonRpcRequest::new(RpcId::String("p".into()), "ping", None))
            .await;
        assert_eq!(resp.result, Some(json!({})));
        assert_eq!(resp.id, RpcId::String("p".into()));
    }

    #[tokio::test]
    async fn test_server_run_with_channel_transport() {
        let (mut client_side, mut server_side) = ChannelTransport::pair();
        let mut server = McpServer::new(test_registry());

        let server_handle = tokio::spawn(async move {
            let result = server.run(&mut server_side).await;
            (result, server.state())
        });

        client_side
            .write_frame(&Message::Request(initialize_request(1)))
            .await
            .unwrap();
        let Some(Message::Response(resp)) = client_side.read_frame().await.unwrap() else {
            panic!("expected initialize response");
        };
        assert_eq!(resp.id, RpcId::Number(1));
        assert_eq!(resp.result.unwrap()["serverInfo"]["name"], "mcpipe-server");

        // Garbage and a stray response are skipped without a reply.
        client_side.send("this is not json").await.unwrap();
        client_side
            .send(r#"{"jsonrpc":"2.0","id":99,"result":{}}"#)
            .await
            .unwrap();
        client_side
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .unwrap();

        client_side
            .write_frame(&Message::Request(call(2, "hello", json!({"name": "Alice"}))))
            .await
            .unwrap();
        let Some(Message::Response(resp)) = client_side.read_frame().await.unwrap() else {
            panic!("expected tools/call response");
        };
        assert_eq!(resp.id, RpcId::Number(2));
        assert_eq!(resp.result.unwrap()["content"][0]["text"], "Hello, Alice!");

        drop(client_side);
        let (result, state) = server_handle.await.unwrap();
        result.unwrap();
        assert_eq!(state, ServerState::ShuttingDown);
    }
}
