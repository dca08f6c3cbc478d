//! JSON-RPC 2.0 message model.
//!
//! Every MCP frame is one of request, notification, or response, or (on the
//! newer protocol revision) an ordered batch of those. Classification is
//! structural: a `method` plus an `id` is a request, a `method` without an
//! `id` is a notification, and a `result` or `error` member is a response.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::borrow::Cow;

use crate::protocol::JSONRPC_VERSION;

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Parse error (invalid JSON)
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request (malformed request)
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid parameters
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP-specific error codes (positive-offset namespace)
pub mod mcp_error_codes {
    /// Bearer token missing or not valid
    pub const AUTHENTICATION_FAILED: i32 = 1000;
    /// Principal lacks access to the capability
    pub const AUTHORIZATION_FAILED: i32 = 1001;
    /// Too many requests
    pub const RATE_LIMIT_EXCEEDED: i32 = 1002;
    /// No protocol version supported by both sides
    pub const UNSUPPORTED_PROTOCOL_VERSION: i32 = 1003;
    /// Argument failed schema validation
    pub const INVALID_ARGUMENT: i32 = 1004;
    /// No tool registered under the name
    pub const TOOL_NOT_FOUND: i32 = 1005;
    /// No static resource or template matched the URI
    pub const RESOURCE_NOT_FOUND: i32 = 1006;
    /// A template was addressed but did not match
    pub const RESOURCE_TEMPLATE_NOT_MATCHED: i32 = 1007;
}

/// JSON-RPC 2.0 request ID: string or number.
///
/// The original scalar type is preserved on the reply, so a client that sent
/// `"id": 7` never gets `"id": "7"` back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn number(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
            id,
        }
    }

    /// Progress token carried in `params._meta.progressToken`, if any.
    pub fn progress_token(&self) -> Option<&Value> {
        self.params
            .as_ref()
            .and_then(|p| p.get("_meta"))
            .and_then(|m| m.get("progressToken"))
    }
}

/// JSON-RPC 2.0 Notification (request without an `id`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Response
///
/// `id` is `None` only for the ParseError reply to a frame whose `id` could
/// not be recovered; the wire shape is then `"id": null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
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

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, format!("Parse error: {}", detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(
            error_codes::INVALID_REQUEST,
            format!("Invalid request: {}", detail.into()),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid params: {}", detail.into()),
        )
    }

    pub fn internal_error() -> Self {
        Self::new(error_codes::INTERNAL_ERROR, "Internal error")
    }

    pub fn unsupported_protocol_version(requested: &str, supported: &[&str]) -> Self {
        Self::new(
            mcp_error_codes::UNSUPPORTED_PROTOCOL_VERSION,
            format!("Unsupported protocol version: {requested}"),
        )
        .with_data(serde_json::json!({ "supported": supported }))
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(mcp_error_codes::TOOL_NOT_FOUND, format!("Tool not found: {name}"))
    }

    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(
            mcp_error_codes::RESOURCE_NOT_FOUND,
            format!("Resource not found: {uri}"),
        )
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(
            mcp_error_codes::INVALID_ARGUMENT,
            format!("Invalid argument: {}", detail.into()),
        )
    }
}

/// A classified JSON-RPC message.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Classify a JSON value as request, notification, or response.
    ///
    /// `jsonrpc` must be exactly "2.0" and a request `id` must be a string
    /// or an integer.
    pub fn classify(value: Value) -> Result<Self, ClassifyError> {
        let obj = match &value {
            Value::Object(obj) => obj,
            _ => return Err(ClassifyError::NotAnObject),
        };

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(_) => return Err(ClassifyError::BadVersion),
            None => return Err(ClassifyError::MissingVersion),
        }

        if obj.contains_key("method") {
            match obj.get("id") {
                None | Some(Value::Null) => {
                    let notification: JsonRpcNotification =
                        serde_json::from_value(value).map_err(ClassifyError::Shape)?;
                    Ok(JsonRpcMessage::Notification(notification))
                }
                Some(id) => {
                    if !matches!(id, Value::String(_)) && id.as_i64().is_none() {
                        return Err(ClassifyError::BadRequestId);
                    }
                    let request: JsonRpcRequest =
                        serde_json::from_value(value).map_err(ClassifyError::Shape)?;
                    Ok(JsonRpcMessage::Request(request))
                }
            }
        } else if obj.contains_key("result") || obj.contains_key("error") {
            if obj.contains_key("result") && obj.contains_key("error") {
                return Err(ClassifyError::ResultAndError);
            }
            let response: JsonRpcResponse =
                serde_json::from_value(value).map_err(ClassifyError::Shape)?;
            Ok(JsonRpcMessage::Response(response))
        } else {
            Err(ClassifyError::NoMethodOrResult)
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.id),
            JsonRpcMessage::Response(resp) => resp.id.as_ref(),
            JsonRpcMessage::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            JsonRpcMessage::Response(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        JsonRpcMessage::classify(value).map_err(serde::de::Error::custom)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(req)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(n)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(resp)
    }
}

/// Classification failure for a structurally invalid frame element.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("frame element is not a JSON object")]
    NotAnObject,
    #[error("missing jsonrpc member")]
    MissingVersion,
    #[error("jsonrpc member must be \"2.0\"")]
    BadVersion,
    #[error("request id must be a string or an integer")]
    BadRequestId,
    #[error("response carries both result and error")]
    ResultAndError,
    #[error("frame element has neither method nor result/error")]
    NoMethodOrResult,
    #[error("malformed message shape: {0}")]
    Shape(#[source] serde_json::Error),
}

/// A wire frame: a single message or an ordered batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcPayload {
    Single(JsonRpcMessage),
    Batch(Vec<JsonRpcMessage>),
}

impl JsonRpcPayload {
    /// Parse raw frame bytes. JSON-level failure is a `ParseError`; an array
    /// frame becomes a batch with each element classified independently.
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadParseError> {
        let value: Value = serde_json::from_slice(raw).map_err(PayloadParseError::Json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, PayloadParseError> {
        match value {
            Value::Array(elements) => {
                let mut messages = Vec::with_capacity(elements.len());
                for element in elements {
                    messages.push(
                        JsonRpcMessage::classify(element).map_err(PayloadParseError::Element)?,
                    );
                }
                Ok(JsonRpcPayload::Batch(messages))
            }
            other => Ok(JsonRpcPayload::Single(
                JsonRpcMessage::classify(other).map_err(PayloadParseError::Element)?,
            )),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, JsonRpcPayload::Batch(_))
    }

    pub fn messages(self) -> Vec<JsonRpcMessage> {
        match self {
            JsonRpcPayload::Single(msg) => vec![msg],
            JsonRpcPayload::Batch(msgs) => msgs,
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        JsonRpcPayload::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Frame parse failure: invalid JSON or an element that fails classification.
#[derive(Debug, thiserror::Error)]
pub enum PayloadParseError {
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error(transparent)]
    Element(ClassifyError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_request() {
        let msg = JsonRpcMessage::classify(json!({
            "jsonrpc": "2.0", "method": "ping", "id": 1
        }))
        .unwrap();
        match msg {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.method, "ping");
                assert_eq!(req.id, RequestId::number(1));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_notification() {
        let msg = JsonRpcMessage::classify(json!({
            "jsonrpc": "2.0", "method": "initialized"
        }))
        .unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_classify_response() {
        let msg = JsonRpcMessage::classify(json!({
            "jsonrpc": "2.0", "result": {}, "id": "a"
        }))
        .unwrap();
        match msg {
            JsonRpcMessage::Response(resp) => {
                assert!(resp.is_success());
                assert_eq!(resp.id, Some(RequestId::string("a")));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_rejects_missing_version() {
        assert!(matches!(
            JsonRpcMessage::classify(json!({"method": "ping", "id": 1})),
            Err(ClassifyError::MissingVersion)
        ));
    }

    #[test]
    fn test_classify_rejects_result_and_error() {
        let err = JsonRpcMessage::classify(json!({
            "jsonrpc": "2.0",
            "result": {},
            "error": {"code": -32600, "message": "x"},
            "id": 1
        }))
        .unwrap_err();
        assert!(matches!(err, ClassifyError::ResultAndError));
    }

    #[test]
    fn test_request_id_scalar_type_preserved() {
        let numeric = JsonRpcResponse::success(RequestId::number(7), json!({}));
        let wire = serde_json::to_value(&numeric).unwrap();
        assert_eq!(wire["id"], json!(7));

        let stringly = JsonRpcResponse::success(RequestId::string("7"), json!({}));
        let wire = serde_json::to_value(&stringly).unwrap();
        assert_eq!(wire["id"], json!("7"));
    }

    #[test]
    fn test_payload_batch_parse() {
        let raw = br#"[
            {"jsonrpc":"2.0","method":"ping","id":1},
            {"jsonrpc":"2.0","method":"initialized"}
        ]"#;
        let payload = JsonRpcPayload::parse(raw).unwrap();
        assert!(payload.is_batch());
        assert_eq!(payload.messages().len(), 2);
    }

    #[test]
    fn test_payload_rejects_invalid_json() {
        assert!(matches!(
            JsonRpcPayload::parse(b"{not json"),
            Err(PayloadParseError::Json(_))
        ));
    }

    #[test]
    fn test_serialize_then_parse_round_trip() {
        let original = JsonRpcMessage::Request(JsonRpcRequest::new(
            RequestId::string("rt-1"),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
        ));
        let bytes = serde_json::to_vec(&original).unwrap();
        let reparsed = JsonRpcPayload::parse(&bytes).unwrap();
        assert_eq!(JsonRpcPayload::Single(original), reparsed);
    }

    #[test]
    fn test_progress_token_extraction() {
        let req = JsonRpcRequest::new(
            RequestId::number(4),
            "tools/call",
            Some(json!({"name": "slow", "arguments": {}, "_meta": {"progressToken": "p1"}})),
        );
        assert_eq!(req.progress_token(), Some(&json!("p1")));

        let bare = JsonRpcRequest::new(RequestId::number(5), "ping", None);
        assert!(bare.progress_token().is_none());
    }

    #[test]
    fn test_error_parse_error_reply_has_null_id() {
        let resp = JsonRpcResponse::error(None, JsonRpcError::parse_error("bad frame"));
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["id"], Value::Null);
        assert_eq!(wire["error"]["code"], json!(error_codes::PARSE_ERROR));
    }
}
