//! JSON-RPC 2.0 message types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard and server-defined JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Message not allowed in the session's current phase.
    pub const PROTOCOL_SEQUENCE: i32 = -32002;
    /// Request id already in flight.
    pub const DUPLICATE_REQUEST: i32 = -32003;
    /// Per-session concurrency ceiling reached.
    pub const SESSION_BUSY: i32 = -32004;
}

/// JSON-RPC request id: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// JSON-RPC request or notification (no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response structure.
///
/// `id` is always serialized; it is `null` when the request id could not be
/// determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self::failure(id, JsonRpcError::new(code, message))
    }

    /// Parse error (the message was not valid JSON).
    pub fn parse_error(detail: impl fmt::Display) -> Self {
        Self::error(None, codes::PARSE_ERROR, format!("Parse error: {}", detail))
    }

    /// Invalid request error.
    pub fn invalid_request(id: Option<RequestId>, msg: impl Into<String>) -> Self {
        Self::error(id, codes::INVALID_REQUEST, msg)
    }

    /// Method not found error.
    pub fn method_not_found(id: Option<RequestId>, method: &str) -> Self {
        Self::error(id, codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Invalid params error.
    pub fn invalid_params(id: Option<RequestId>, msg: impl Into<String>) -> Self {
        Self::error(id, codes::INVALID_PARAMS, msg)
    }

    /// Internal error.
    pub fn internal_error(id: Option<RequestId>, msg: impl Into<String>) -> Self {
        Self::error(id, codes::INTERNAL_ERROR, msg)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Decode one framed message.
///
/// Anything that cannot be handled as a single request or notification is
/// turned into the error response to send back instead.
pub fn decode_message(raw: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_str(raw).map_err(JsonRpcResponse::parse_error)?;

    let object = match value {
        Value::Object(object) => object,
        Value::Array(_) => {
            return Err(JsonRpcResponse::invalid_request(
                None,
                "Batch requests are not supported",
            ));
        }
        _ => {
            return Err(JsonRpcResponse::invalid_request(
                None,
                "Request must be a JSON object",
            ));
        }
    };

    let id = object
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    let request: JsonRpcRequest = serde_json::from_value(Value::Object(object))
        .map_err(|e| JsonRpcResponse::invalid_request(id.clone(), format!("Invalid Request: {}", e)))?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(JsonRpcResponse::invalid_request(
            id,
            format!("Unsupported jsonrpc version: {}", request.jsonrpc),
        ));
    }

    Ok(request)
}
