//! MCP client implementation.
//!
//! A [`McpClient`] is one session with one server. Writes go straight to the
//! transport's sink; a background task owns the read side and routes every
//! response to the caller waiting on its id, in the style of a
//! correlation-id request/reply client. Correlation is by id only: responses
//! may arrive in any order relative to each other and to notifications.
//!
//! Every blocking call takes an optional timeout. A timed-out caller stops
//! waiting, but nothing is sent to the server; if the answer shows up later
//! it no longer matches a pending id and is logged and dropped.

use serde_json::Value;
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::codec::Message;
use crate::error::McpError;
use crate::supervisor::{drain_stderr, ServerCommand, ServerProcess, StderrMode};
use crate::transport::{FrameSink, FrameSource, McpTransport};
use crate::types::*;

/// Buffered server notifications not yet taken by [`McpClient::next_notification`].
const NOTIFICATION_BUFFER: usize = 64;

/// Answers to server-initiated requests waiting for the sink.
const REPLY_BUFFER: usize = 16;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Outcome of a `tools/call` that reached the server.
///
/// An error response ("tool not found", a failing handler) is a normal
/// outcome and is returned as data, not as an [`McpError`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(CallToolResult),
    Failed(JsonRpcError),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        match self {
            ToolOutcome::Completed(result) => result.is_error,
            ToolOutcome::Failed(_) => true,
        }
    }

    /// The first text block of a result, or the error message.
    pub fn text(&self) -> Option<&str> {
        match self {
            ToolOutcome::Completed(result) => result.first_text(),
            ToolOutcome::Failed(err) => Some(&err.message),
        }
    }
}

/// Identity the client announces in `initialize`.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "mcpipe-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Waiters keyed by request id. `closed` is set, under the same lock, when
/// the read side ends, so no waiter can be registered after the final drain.
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<RpcId, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

struct Shared {
    sink: Mutex<Box<dyn FrameSink>>,
    pending: Mutex<PendingTable>,
    /// Never leaves `Closed` once there.
    state: std::sync::Mutex<SessionState>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != SessionState::Closed {
            *state = next;
        }
    }
}

/// An MCP client session.
pub struct McpClient {
    shared: Arc<Shared>,
    next_id: AtomicI64,
    identity: ClientIdentity,
    server: OnceLock<InitializeResult>,
    notifications: Mutex<mpsc::Receiver<JsonRpcNotification>>,
    reader: JoinHandle<()>,
    replier: JoinHandle<()>,
    process: Mutex<Option<ServerProcess>>,
}

impl McpClient {
    /// Start a session over an existing transport.
    ///
    /// Must be called inside a tokio runtime. The handshake is not performed;
    /// call [`McpClient::initialize`] next.
    pub fn connect<T: McpTransport>(transport: T) -> Self {
        let (source, sink) = transport.into_split();
        Self::from_parts(source, sink)
    }

    /// Start a session over separate read and write halves.
    pub fn from_parts(source: impl FrameSource + 'static, sink: impl FrameSink + 'static) -> Self {
        Self::start(Box::new(source), Box::new(sink), None)
    }

    fn start(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        process: Option<ServerProcess>,
    ) -> Self {
        let shared = Arc::new(Shared {
            sink: Mutex::new(sink),
            pending: Mutex::new(PendingTable::default()),
            state: std::sync::Mutex::new(SessionState::Uninitialized),
        });
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let (reply_tx, reply_rx) = mpsc::channel(REPLY_BUFFER);

        let loop_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            Self::read_loop(source, loop_shared, notify_tx, reply_tx).await;
        });
        let replier = tokio::spawn(Self::reply_loop(Arc::clone(&shared), reply_rx));

        Self {
            shared,
            next_id: AtomicI64::new(1),
            identity: ClientIdentity::default(),
            server: OnceLock::new(),
            notifications: Mutex::new(notify_rx),
            reader,
            replier,
            process: Mutex::new(process),
        }
    }

    /// Spawn an MCP server process and connect to it.
    ///
    /// The server's stderr is drained into this process's log at debug level.
    pub fn spawn(command: &ServerCommand) -> Result<Self, McpError> {
        let mut process = ServerProcess::spawn(command, StderrMode::Piped)?;
        if let Some(stderr) = process.take_stderr() {
            drain_stderr(stderr, process.label().to_string());
        }
        let source = process.take_stdout()?;
        let sink = process.take_stdin()?;

        Ok(Self::start(Box::new(source), Box::new(sink), Some(process)))
    }

    /// Override the name/version announced in `initialize`.
    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    fn set_state(&self, state: SessionState) {
        self.shared.set_state(state);
    }

    /// What the server reported about itself during the handshake.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.get()
    }

    // ── Read side ───────────────────────────────────────────────────

    /// Owns the read half until end-of-stream, then closes the session and
    /// fails every waiter. Never waits on the sink.
    async fn read_loop(
        mut source: Box<dyn FrameSource>,
        shared: Arc<Shared>,
        notifications: mpsc::Sender<JsonRpcNotification>,
        replies: mpsc::Sender<JsonRpcResponse>,
    ) {
        loop {
            let message = match source.read_frame().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::debug!("server closed its output");
                    break;
                }
                Err(McpError::MalformedMessage(reason)) => {
                    tracing::warn!(%reason, "skipping malformed frame from server");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport read failed");
                    break;
                }
            };

            match message {
                Message::Response(response) => Self::dispatch_response(&shared, response).await,
                Message::Notification(notif) => {
                    tracing::debug!(method = %notif.method, "server notification");
                    if let Err(mpsc::error::TrySendError::Full(n)) = notifications.try_send(notif) {
                        tracing::warn!(method = %n.method, "notification buffer full, dropping");
                    }
                }
                Message::Request(request) => {
                    let response = Self::answer_server_request(request);
                    if let Err(mpsc::error::TrySendError::Full(r)) = replies.try_send(response) {
                        tracing::warn!(id = %r.id, "reply queue full, dropping answer to server request");
                    }
                }
            }
        }

        let mut table = shared.pending.lock().await;
        table.closed = true;
        shared.set_state(SessionState::Closed);
        if !table.waiters.is_empty() {
            tracing::warn!(pending = table.waiters.len(), "connection lost with requests in flight");
        }
        // Dropping the senders wakes every waiter with a closed channel.
        table.waiters.clear();
    }

    /// Route an inbound response to the caller waiting on its id.
    async fn dispatch_response(shared: &Shared, response: JsonRpcResponse) {
        let waiter = shared.pending.lock().await.waiters.remove(&response.id);
        match waiter {
            Some(tx) => {
                let id = response.id.clone();
                if tx.send(response).is_err() {
                    tracing::debug!(%id, "caller stopped waiting before the response arrived");
                }
            }
            None => tracing::warn!(id = %response.id, "dropping stray response"),
        }
    }

    /// Servers may ping the client; anything else is unsupported.
    fn answer_server_request(request: JsonRpcRequest) -> JsonRpcResponse {
        if request.method == methods::PING {
            JsonRpcResponse::success(request.id, serde_json::json!({}))
        } else {
            tracing::debug!(method = %request.method, "unsupported server request");
            JsonRpcResponse::from_error(
                request.id,
                McpError::MethodNotFound(request.method).to_rpc_error(),
            )
        }
    }

    /// Writes answers to server requests in arrival order, so a caller
    /// holding the sink delays them without stalling the read side.
    async fn reply_loop(shared: Arc<Shared>, mut replies: mpsc::Receiver<JsonRpcResponse>) {
        while let Some(response) = replies.recv().await {
            let mut sink = shared.sink.lock().await;
            if let Err(e) = sink.write_frame(&Message::Response(response)).await {
                tracing::warn!(error = %e, "failed to answer server request");
            }
        }
    }

    // ── Write side ──────────────────────────────────────────────────

    fn allocate_id(&self) -> RpcId {
        RpcId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn send_message(&self, message: &Message) -> Result<(), McpError> {
        let mut sink = self.shared.sink.lock().await;
        sink.write_frame(message).await
    }

    /// Send a request with the given id and wait for its response.
    async fn request_with_id(
        &self,
        id: RpcId,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, McpError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.shared.pending.lock().await;
            if table.closed {
                return Err(McpError::ConnectionLost("server connection closed".to_string()));
            }
            table.waiters.insert(id.clone(), tx);
        }

        tracing::debug!(method = %method, %id, "Sending request");
        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.send_message(&Message::Request(request)).await {
            self.shared.pending.lock().await.waiters.remove(&id);
            return Err(e);
        }

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.shared.pending.lock().await.waiters.remove(&id);
                    tracing::warn!(method = %method, %id, ?limit, "request timed out");
                    return Err(McpError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        received.map_err(|_| {
            McpError::ConnectionLost(format!("connection closed while waiting for '{method}'"))
        })
    }

    /// Send a request with a fresh id and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.allocate_id();
        self.request_with_id(id, method, params, timeout).await
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notif = JsonRpcNotification::new(method, params);
        self.send_message(&Message::Notification(notif)).await
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(McpError::ConnectionLost("session closed".to_string())),
            _ => Err(McpError::NotInitialized),
        }
    }

    fn into_result(response: JsonRpcResponse) -> Result<Value, McpError> {
        match (response.error, response.result) {
            (Some(err), _) => Err(McpError::Rpc(err)),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }

    // ── Protocol operations ─────────────────────────────────────────

    /// Perform the two-phase MCP handshake: `initialize` request/response,
    /// then the `notifications/initialized` acknowledgement.
    pub async fn initialize(&self, timeout: Option<Duration>) -> Result<InitializeResult, McpError> {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                SessionState::Uninitialized => *state = SessionState::Initializing,
                SessionState::Closed => {
                    return Err(McpError::ConnectionLost("session closed".to_string()))
                }
                _ => {
                    return Err(McpError::HandshakeFailed(
                        "handshake already performed".to_string(),
                    ))
                }
            }
        }

        match self.handshake(timeout).await {
            Ok(result) => {
                tracing::info!(
                    server = %result.server_info.name,
                    version = ?result.server_info.version,
                    "MCP client initialized"
                );
                let result = self.server.get_or_init(|| result).clone();
                self.set_state(SessionState::Ready);
                Ok(result)
            }
            Err(e) => {
                let next = if e.is_connection_lost() || matches!(e, McpError::HandshakeFailed(_)) {
                    SessionState::Closed
                } else {
                    SessionState::Uninitialized
                };
                self.set_state(next);
                Err(e)
            }
        }
    }

    async fn handshake(&self, timeout: Option<Duration>) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.identity.name.clone(),
                version: Some(self.identity.version.clone()),
            },
        })?;

        let id = self.allocate_id();
        let response = self
            .request_with_id(id.clone(), methods::INITIALIZE, Some(params), timeout)
            .await
            .map_err(|e| match e {
                McpError::ConnectionLost(_) | McpError::Transport(_) => McpError::HandshakeFailed(
                    "server closed the connection before answering initialize".to_string(),
                ),
                other => other,
            })?;

        if response.id != id {
            return Err(McpError::HandshakeFailed(format!(
                "expected response id {id}, got {}",
                response.id
            )));
        }

        let value = Self::into_result(response).map_err(|e| match e {
            McpError::Rpc(err) => McpError::HandshakeFailed(err.message),
            other => other,
        })?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::HandshakeFailed(format!("invalid initialize result: {e}")))?;

        self.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self, timeout: Option<Duration>) -> Result<Vec<ToolInfo>, McpError> {
        self.ensure_ready()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = serde_json::to_value(ListToolsParams {
                cursor: cursor.take(),
            })?;
            let response = self.request(methods::TOOLS_LIST, Some(params), timeout).await?;
            let page: ListToolsResult = serde_json::from_value(Self::into_result(response)?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(count = tools.len(), "Tool discovery complete");
        Ok(tools)
    }

    /// Call a tool on the remote MCP server.
    ///
    /// `Err` is reserved for transport failures, timeouts and protocol
    /// misuse; anything the server answered comes back as a [`ToolOutcome`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolOutcome, McpError> {
        self.ensure_ready()?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let response = self.request(methods::TOOLS_CALL, Some(params), timeout).await?;

        if let Some(err) = response.error {
            tracing::debug!(tool = %name, code = err.code, message = %err.message, "tool call failed");
            return Ok(ToolOutcome::Failed(err));
        }
        let result: CallToolResult =
            serde_json::from_value(response.result.unwrap_or(Value::Null))?;
        Ok(ToolOutcome::Completed(result))
    }

    /// Resources the server exposes, following pagination cursors.
    pub async fn list_resources(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<ResourceInfo>, McpError> {
        self.ensure_ready()?;

        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = serde_json::to_value(ListResourcesParams {
                cursor: cursor.take(),
            })?;
            let response = self.request(methods::RESOURCES_LIST, Some(params), timeout).await?;
            let page: ListResourcesResult = serde_json::from_value(Self::into_result(response)?)?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(resources)
    }

    /// Prompt templates the server exposes, following pagination cursors.
    pub async fn list_prompts(&self, timeout: Option<Duration>) -> Result<Vec<PromptInfo>, McpError> {
        self.ensure_ready()?;

        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = serde_json::to_value(ListPromptsParams {
                cursor: cursor.take(),
            })?;
            let response = self.request(methods::PROMPTS_LIST, Some(params), timeout).await?;
            let page: ListPromptsResult = serde_json::from_value(Self::into_result(response)?)?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(prompts)
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self, timeout: Option<Duration>) -> Result<(), McpError> {
        self.ensure_ready()?;
        let response = self.request(methods::PING, None, timeout).await?;
        Self::into_result(response).map(|_| ())
    }

    /// Next notification pushed by the server.
    ///
    /// Returns `Ok(None)` once the connection is gone and every buffered
    /// notification has been taken.
    pub async fn next_notification(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<JsonRpcNotification>, McpError> {
        let mut rx = self.notifications.lock().await;
        match timeout {
            Some(limit) => tokio::time::timeout(limit, rx.recv())
                .await
                .map_err(|_| McpError::Timeout(limit)),
            None => Ok(rx.recv().await),
        }
    }

    /// Whether the read side has seen end-of-stream.
    pub async fn is_connection_lost(&self) -> bool {
        self.shared.pending.lock().await.closed
    }

    /// End the session: close the server's input, then wait up to `grace`
    /// for a spawned server to exit before killing it.
    ///
    /// Closing the sink drops the child's stdin pipe, so a well-behaved server
    /// sees end-of-file and exits within the grace period.
    ///
    /// Returns the exit status when this client spawned the server.
    pub async fn shutdown(self, grace: Duration) -> Result<Option<ExitStatus>, McpError> {
        self.set_state(SessionState::Closed);
        if let Err(e) = self.shared.sink.lock().await.close().await {
            tracing::debug!(error = %e, "closing server input failed");
        }

        let status = match self.process.lock().await.as_mut() {
            Some(process) => {
                tracing::info!("Shutting down MCP server process");
                Some(process.shutdown(grace).await?)
            }
            None => None,
        };
        Ok(status)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.replier.abort();
    }
}
