//! JSON-RPC 2.0 wire types.
//!
//! Only the subset the analyzer protocol needs: integer request ids,
//! responses, error responses, and server-initiated notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// An outgoing request. Ids are generated by the client and are always
/// integers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A successful response. A missing `result` field decodes as `Value::Null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    pub id: i64,
    #[serde(default)]
    pub result: Value,
}

/// The `error` member of an error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An error response correlated to a request id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub jsonrpc: String,
    pub id: i64,
    pub error: ErrorObject,
}

/// A server-initiated notification (no id, no reply expected).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any message the server may send us. Variants are tried in order, so the
/// discriminating fields (`error`, `result`, `method`) must stay required.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Error(ErrorResponse),
    Response(Response),
    Notification(Notification),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_without_null_params() {
        let req = Request::new(7, "analysis_engine.Analyze", None);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value.get("params"), None);
        assert_eq!(value["id"], 7);
        assert_eq!(value["jsonrpc"], "2.0");
    }

    #[test]
    fn incoming_distinguishes_response_from_error() {
        let resp: Incoming =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}))
                .unwrap();
        assert!(matches!(resp, Incoming::Response(_)));

        let err: Incoming = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "boom"}}),
        )
        .unwrap();
        assert!(matches!(err, Incoming::Error(_)));
    }

    #[test]
    fn incoming_parses_notification() {
        let note: Incoming = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "progress", "params": {"pct": 50}}),
        )
        .unwrap();
        assert!(matches!(note, Incoming::Notification(n) if n.method == "progress"));
    }

    #[test]
    fn response_with_missing_result_is_null() {
        let resp: Response =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 3})).unwrap();
        assert!(resp.result.is_null());
    }
}
