//! JSON-RPC 2.0 envelope for MCP tool calls.
//!
//! The mesh treats the MCP protocol as an opaque JSON-RPC envelope: the
//! proxy forwards it verbatim and the caller only needs `tools/call` plus
//! the ability to unwrap a response that arrives either as a plain JSON
//! body or as the first `data:` message of an SSE stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MeshError;

/// JSON-RPC error code: invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC error code: the request object is not valid.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC error code: method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code: internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Mesh application error code: a declared dependency has no live provider.
pub const DEPENDENCY_UNAVAILABLE: i64 = -32011;

/// JSON-RPC 2.0 request object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: Option<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Build a `tools/call` request for the named tool.
    pub fn tools_call(id: i64, name: &str, arguments: Value) -> Self {
        Self::new(
            Some(Value::from(id)),
            "tools/call",
            Some(serde_json::json!({"name": name, "arguments": arguments})),
        )
    }

    /// Build a `tools/list` request.
    pub fn tools_list(id: i64) -> Self {
        Self::new(Some(Value::from(id)), "tools/list", None)
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(id: Option<Value>, details: &str) -> Self {
        Self::error(id, INVALID_PARAMS, format!("Invalid params: {}", details))
    }

    pub fn dependency_unavailable(id: Option<Value>, capability: &str) -> Self {
        Self::error(
            id,
            DEPENDENCY_UNAVAILABLE,
            format!("DEPENDENCY_UNAVAILABLE: no live provider for {}", capability),
        )
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Extract the first complete JSON-RPC message from an SSE body.
///
/// SSE frames an event as one or more consecutive `data:` lines terminated
/// by a blank line. Multi-line data is joined with `\n` before parsing.
pub fn first_message_from_sse(body: &str) -> Option<JsonRpcResponse> {
    let mut data_lines: Vec<&str> = Vec::new();
    for line in body.lines().chain(std::iter::once("")) {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.trim().is_empty() && !data_lines.is_empty() {
            let payload = data_lines.join("\n");
            data_lines.clear();
            if let Ok(msg) = serde_json::from_str::<JsonRpcResponse>(&payload) {
                return Some(msg);
            }
        }
    }
    None
}

/// Decode a dispatch response body, accepting plain JSON or SSE framing.
pub fn decode_response(content_type: &str, body: &str) -> Result<JsonRpcResponse, MeshError> {
    if content_type.contains("text/event-stream") {
        first_message_from_sse(body).ok_or_else(|| {
            MeshError::validation("SSE stream contained no JSON-RPC message")
        })
    } else {
        serde_json::from_str(body)
            .map_err(|e| MeshError::validation(format!("invalid JSON-RPC response: {}", e)))
    }
}
