//! Newline-delimited JSON-RPC framing.
//!
//! One frame is one line of UTF-8 text holding exactly one JSON object.
//! [`decode`] classifies a line into a [`Message`] by which of `id`,
//! `method`, `result` and `error` are present.

use serde_json::Value;

use crate::error::McpError;
use crate::types::*;

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl Message {
    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }

    /// Id for requests and responses.
    pub fn id(&self) -> Option<&RpcId> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Response(r) => Some(&r.id),
            Message::Notification(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(r: JsonRpcRequest) -> Self {
        Message::Request(r)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(n: JsonRpcNotification) -> Self {
        Message::Notification(n)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(r: JsonRpcResponse) -> Self {
        Message::Response(r)
    }
}

/// Serialize a message as a single line of JSON, without the terminator.
pub fn to_line(message: &Message) -> Result<String, McpError> {
    let line = match message {
        Message::Request(r) => serde_json::to_string(r)?,
        Message::Notification(n) => serde_json::to_string(n)?,
        Message::Response(r) => serde_json::to_string(r)?,
    };
    Ok(line)
}

/// Encode a message as one `\n`-terminated frame.
///
/// `serde_json` escapes control characters inside strings, so the only raw
/// newline in the output is the terminator.
pub fn encode(message: &Message) -> Result<Vec<u8>, McpError> {
    let mut bytes = to_line(message)?.into_bytes();
    bytes.push(b'\n');
    Ok(bytes)
}

fn malformed(reason: impl Into<String>) -> McpError {
    McpError::MalformedMessage(reason.into())
}

/// Parse one line into a [`Message`].
///
/// Surrounding whitespace (including the line terminator) is ignored.
pub fn decode(line: &str) -> Result<Message, McpError> {
    let value: Value = serde_json::from_str(line.trim())
        .map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    let (has_id, has_method, has_result, has_error) = {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("frame is not a JSON object"))?;

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            _ => return Err(malformed("missing \"jsonrpc\": \"2.0\" marker")),
        }

        (
            obj.get("id").is_some_and(|id| !id.is_null()),
            obj.contains_key("method"),
            obj.contains_key("result"),
            obj.contains_key("error"),
        )
    };

    let message = match (has_method, has_id) {
        (true, true) => Message::Request(
            serde_json::from_value(value).map_err(|e| malformed(format!("bad request: {e}")))?,
        ),
        (true, false) => Message::Notification(
            serde_json::from_value(value)
                .map_err(|e| malformed(format!("bad notification: {e}")))?,
        ),
        (false, true) if has_result != has_error => Message::Response(
            serde_json::from_value(value).map_err(|e| malformed(format!("bad response: {e}")))?,
        ),
        (false, true) => {
            return Err(malformed(
                "response must carry exactly one of \"result\" or \"error\"",
            ))
        }
        (false, false) => return Err(malformed("frame has neither \"method\" nor \"id\"")),
    };

    Ok(message)
}
