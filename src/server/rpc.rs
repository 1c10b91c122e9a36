//! JSON-RPC 2.0 envelopes.
//!
//! Both transports speak the same shape: `method` is the tool name,
//! `params` the tool's argument object. The dispatcher is the single
//! point translating domain errors into API error payloads; the
//! structured form (code, hint, retryable) rides in `error.data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Params that did not match the tool's input shape.
pub const INVALID_PARAMS: i64 = -32602;
/// Domain errors surface as implementation-defined server errors.
pub const SERVER_ERROR: i64 = -32000;

/// Per-request metadata carried outside the tool arguments.
///
/// The stdio transport passes the session id here; the HTTP transport
/// uses the `Mcp-Session-Id` header instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// An incoming JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent id marks a notification; no response is sent.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub meta: Option<RequestMeta>,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outgoing JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// A success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A protocol-level error response.
    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// A malformed-params response: the argument object did not
    /// deserialize into the tool's declared inputs.
    #[must_use]
    pub fn invalid_params(id: Value, message: impl Into<String>) -> Self {
        Self::error(
            id,
            INVALID_PARAMS,
            format!("invalid params: {}", message.into()),
        )
    }

    /// A domain error response, carrying the stable API code and
    /// recovery hint in `error.data`.
    #[must_use]
    pub fn domain_error(id: Value, err: &Error) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code: SERVER_ERROR,
                message: err.to_string(),
                data: Some(err.to_structured_json()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_with_meta() {
        let req: RpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"activate","params":{"id":"rec_1"},"meta":{"session_id":"sess_9"}}"#,
        )
        .unwrap();
        assert_eq!(req.method, "activate");
        assert_eq!(req.meta.unwrap().session_id.as_deref(), Some("sess_9"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"save_session"}"#).unwrap();
        assert!(req.id.is_none());
        assert!(req.params.is_null());
    }

    #[test]
    fn test_domain_error_payload() {
        let err = Error::RecordNotFound { id: "rec_1".into() };
        let resp = RpcResponse::domain_error(Value::from(3), &err);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], SERVER_ERROR);
        assert_eq!(json["error"]["data"]["code"], "RECORD_NOT_FOUND");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_invalid_params_uses_protocol_code() {
        let resp = RpcResponse::invalid_params(Value::from(7), "missing field `to_state`");
        let err = resp.error.as_ref().unwrap();
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.message.contains("to_state"));
        assert!(err.data.is_none());
    }

    #[test]
    fn test_success_skips_error_field() {
        let resp = RpcResponse::success(Value::from(1), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"error\""));
    }
}
