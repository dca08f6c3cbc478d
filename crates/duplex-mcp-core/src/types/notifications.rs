//! Notification payloads: cancellation, progress, logging, list changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::jsonrpc::RequestId;

/// Params of `$/cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelledNotification {
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Progress token: opaque string or number, scalar type preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

impl From<&Value> for ProgressToken {
    fn from(value: &Value) -> Self {
        match value {
            Value::Number(n) => ProgressToken::Number(n.as_i64().unwrap_or_default()),
            other => ProgressToken::String(other.as_str().unwrap_or_default().to_string()),
        }
    }
}

/// Params of `$/progress`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressNotification {
    pub token: ProgressToken,
    pub value: ProgressValue,
}

/// Progress payload: free-form string, message-with-percentage, or any
/// implementation-defined shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ProgressValue {
    Message(String),
    Detailed {
        message: String,
        percentage: f64,
    },
    Other(Value),
}

impl From<String> for ProgressValue {
    fn from(message: String) -> Self {
        ProgressValue::Message(message)
    }
}

impl From<&str> for ProgressValue {
    fn from(message: &str) -> Self {
        ProgressValue::Message(message.to_string())
    }
}

/// Severity for `notifications/message` and `logging/setLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Params of `logging/setLevel`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetLevelRequest {
    pub level: LogLevel,
}

/// Params of `notifications/message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogMessageNotification {
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub data: Value,
}
