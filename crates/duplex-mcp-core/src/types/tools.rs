//! Tool definitions, calls, and results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::protocol::version::ProtocolVersion;
use crate::types::content::Content;

/// A published tool definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Params of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl CallToolRequest {
    pub fn new(name: impl Into<String>, arguments: Option<Map<String, Value>>) -> Self {
        Self {
            name: name.into(),
            arguments,
            meta: None,
        }
    }
}

/// Result of `tools/call`.
///
/// The wire shape is revision-dependent: the legacy revision has no
/// `structuredContent` member, so serialization goes through
/// [`CallToolResult::to_wire`].
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none", default)]
    pub is_error: Option<bool>,
    #[serde(
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: None,
            structured_content: None,
        }
    }

    /// A tool-level failure: the RPC reply stays successful, `isError` is set
    /// and the content carries the user-facing message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: Some(true),
            structured_content: None,
        }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured_content = Some(value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Serialize for the negotiated revision. The legacy shape drops
    /// `structuredContent`.
    pub fn to_wire(&self, version: ProtocolVersion) -> Value {
        let mut wire = Map::new();
        wire.insert("content".to_string(), json!(self.content));
        if let Some(is_error) = self.is_error {
            wire.insert("isError".to_string(), json!(is_error));
        }
        if version.supports_structured_content() {
            if let Some(structured) = &self.structured_content {
                wire.insert("structuredContent".to_string(), structured.clone());
            }
        }
        Value::Object(wire)
    }
}

impl From<String> for CallToolResult {
    fn from(text: String) -> Self {
        CallToolResult::text(text)
    }
}

impl From<Vec<Content>> for CallToolResult {
    fn from(content: Vec<Content>) -> Self {
        Self {
            content,
            is_error: None,
            structured_content: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_content_dropped_on_legacy() {
        let result = CallToolResult::text("4").with_structured(json!({"value": 4}));

        let newer = result.to_wire(ProtocolVersion::V2025_03_26);
        assert_eq!(newer["structuredContent"], json!({"value": 4}));

        let legacy = result.to_wire(ProtocolVersion::V2024_11_05);
        assert!(legacy.get("structuredContent").is_none());
        assert_eq!(legacy["content"][0]["text"], json!("4"));
    }

    #[test]
    fn test_error_result_sets_flag() {
        let result = CallToolResult::error("division by zero");
        assert!(result.is_error());
        let wire = result.to_wire(ProtocolVersion::V2025_03_26);
        assert_eq!(wire["isError"], json!(true));
        assert_eq!(wire["content"][0]["text"], json!("division by zero"));
    }

    #[test]
    fn test_success_result_omits_is_error() {
        let wire = CallToolResult::text("hi").to_wire(ProtocolVersion::V2024_11_05);
        assert!(wire.get("isError").is_none());
    }
}
