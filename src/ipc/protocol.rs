//! JSON-RPC 2.0 wire types.
//!
//! # Wire format
//!
//! Every message is a single line of JSON followed by `\n`:
//!
//! ```json
//! {"jsonrpc":"2.0","id":1,"method":"project.switch","params":{"name":"alpha"}}
//! {"jsonrpc":"2.0","id":1,"result":{"previous":null,"new":"alpha","windows_hidden":0,"windows_shown":2,"failed":[]}}
//! {"jsonrpc":"2.0","id":2,"error":{"code":1001,"message":"project not found: ghost","data":{"project":"ghost"}}}
//! {"jsonrpc":"2.0","method":"event","params":{"type":"workspace_mode","payload":{"event_type":"nav","direction":"down"}}}
//! ```

use crate::error::DaemonError;
use log::error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of server-to-client event notifications.
pub const EVENT_METHOD: &str = "event";

/// JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const PROJECT_NOT_FOUND: i64 = 1001;
    pub const LAYOUT_NOT_FOUND: i64 = 1002;
    pub const VALIDATION_ERROR: i64 = 1003;
    pub const STATE_CONFLICT: i64 = 1004;
    pub const COMPOSITOR_UNAVAILABLE: i64 = 1005;
    pub const ALREADY_EXISTS: i64 = 1006;
}

/// A parsed request.  `id` is `None` for notifications, which get no
/// response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

/// The `error` member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&DaemonError> for RpcError {
    fn from(e: &DaemonError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            data: e.data(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Build the response for a handler outcome.
    pub fn from_result(id: Value, result: Result<Value, DaemonError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::failure(id, RpcError::from(&e)),
        }
    }

    /// Serialize as one wire line (without the trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!("failed to serialize response: {}", e);
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": self.id,
                "error": { "code": codes::INTERNAL_ERROR, "message": "unserializable response" },
            })
            .to_string()
        })
    }
}

/// Parse one line into a [`Request`].  On failure, returns the error
/// response to send back (parse error or invalid request).
pub fn parse_request(line: &str) -> Result<Request, Response> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        Response::failure(
            Value::Null,
            RpcError::new(codes::PARSE_ERROR, format!("parse error: {}", e)),
        )
    })?;

    let id = value.get("id").cloned();
    let invalid = |msg: &str| {
        Response::failure(
            id.clone().unwrap_or(Value::Null),
            RpcError::new(codes::INVALID_REQUEST, format!("invalid request: {}", msg)),
        )
    };

    let Some(obj) = value.as_object() else {
        return Err(invalid("expected a JSON object"));
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid("jsonrpc must be \"2.0\""));
    }
    if let Some(id) = &id {
        if !(id.is_string() || id.is_number() || id.is_null()) {
            return Err(invalid("id must be a string, number or null"));
        }
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err(invalid("method must be a string"));
    };
    let params = obj.get("params").cloned().unwrap_or(Value::Null);
    if !(params.is_object() || params.is_array() || params.is_null()) {
        return Err(invalid("params must be an object or array"));
    }

    Ok(Request {
        id,
        method: method.to_string(),
        params,
    })
}

/// Deserialize request params; absent params read as `{}`.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, DaemonError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| DaemonError::InvalidParams(e.to_string()))
}

/// Topic of a broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkspaceMode,
    Project,
    Layout,
    Window,
    Workspace,
    Daemon,
}

/// The `{type, payload}` envelope delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Always an object carrying an `event_type` member.
    pub payload: Value,
}

impl Event {
    pub fn new(kind: EventKind, payload: impl Serialize) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            error!("failed to serialize {:?} event: {}", kind, e);
            Value::Null
        });
        Self { kind, payload }
    }

    /// The notification line carrying this event.
    pub fn to_notification_line(&self) -> String {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": EVENT_METHOD,
            "params": self,
        })
        .to_string()
    }
}
