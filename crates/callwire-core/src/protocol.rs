//! JSON-RPC 2.0 wire types and inbound message classification.
//!
//! ```text
//! request:  {"jsonrpc":"2.0","id":1,"method":"execute","params":{...}}
//! success:  {"jsonrpc":"2.0","id":1,"result":...}
//! error:    {"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"..."}}
//! batch:    [request, request, ...]
//! ```

use crate::config::RpcConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// JSON-RPC 2.0 request. A request without an `id` is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(id.into()),
        }
    }

    /// Create a notification (no `id`, no response expected).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: None,
        }
    }

    /// The id to echo in a response (`null` for notifications).
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    /// Create an error response carrying a `data` member.
    pub fn error_with_data(
        id: Value,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }

    fn invalid_request(id: Value, detail: impl Into<String>) -> Self {
        Self::error_with_data(
            id,
            codes::INVALID_REQUEST,
            "Invalid Request",
            Some(Value::String(detail.into())),
        )
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One classified JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Request(RpcRequest),
    Notification(RpcRequest),
    /// A structurally invalid message, already rendered as its error response.
    Invalid(RpcResponse),
}

/// A classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Single(Entry),
    Batch(Vec<Entry>),
    /// The payload as a whole could not be interpreted.
    Invalid(RpcResponse),
}

/// Classify a raw request body.
///
/// - empty body: `-32603 Internal error`
/// - not JSON: `-32700 Parse error`
/// - empty array: `-32600 Invalid Request`
/// - array: each member classified on its own
pub fn parse_message(body: &[u8]) -> Incoming {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Incoming::Invalid(RpcResponse::error(
            Value::Null,
            codes::INTERNAL_ERROR,
            "Internal error",
        ));
    }

    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return Incoming::Invalid(RpcResponse::error_with_data(
                Value::Null,
                codes::PARSE_ERROR,
                "Parse error",
                Some(Value::String(e.to_string())),
            ));
        }
    };

    match value {
        Value::Array(items) if items.is_empty() => Incoming::Invalid(
            RpcResponse::invalid_request(Value::Null, "empty batch"),
        ),
        Value::Array(items) => Incoming::Batch(items.into_iter().map(classify).collect()),
        other => Incoming::Single(classify(other)),
    }
}

/// Classify a single decoded JSON-RPC member.
pub fn classify(value: Value) -> Entry {
    let Value::Object(mut object) = value else {
        return Entry::Invalid(RpcResponse::invalid_request(
            Value::Null,
            "expected an object",
        ));
    };

    let id = match object.remove("id") {
        None => None,
        Some(id @ (Value::String(_) | Value::Number(_) | Value::Null)) => Some(id),
        Some(_) => {
            return Entry::Invalid(RpcResponse::invalid_request(
                Value::Null,
                "id must be a string, number or null",
            ));
        }
    };
    let response_id = id.clone().unwrap_or(Value::Null);

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(RpcConfig::JSONRPC_VERSION) => {}
        _ => {
            return Entry::Invalid(RpcResponse::invalid_request(
                response_id,
                "expected jsonrpc 2.0",
            ));
        }
    }

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => {
            return Entry::Invalid(RpcResponse::invalid_request(
                response_id,
                "method must be a string",
            ));
        }
    };

    let params = match object.remove("params") {
        None => None,
        Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
        Some(_) => {
            return Entry::Invalid(RpcResponse::invalid_request(
                response_id,
                "params must be an object or an array",
            ));
        }
    };

    let request = RpcRequest {
        jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
        method,
        params,
        id,
    };
    if request.id.is_some() {
        Entry::Request(request)
    } else {
        Entry::Notification(request)
    }
}
