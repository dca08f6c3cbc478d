//! Sampling: the server asks the client's LLM for a completion.

use serde::{Deserialize, Serialize};

use crate::types::content::Content;
use crate::types::prompts::Role;

/// Params of the server-initiated `sampling/createMessage` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CreateMessageRequest {
    pub messages: Vec<SamplingMessage>,

    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(rename = "stopSequences", skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(rename = "modelPreferences", skip_serializing_if = "Option::is_none")]
    pub model_preferences: Option<ModelPreferences>,
}

/// One chat message in a sampling exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingMessage {
    pub role: Role,
    pub content: Content,
}

impl SamplingMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::text(text),
        }
    }
}

/// Model selection hints; all advisory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<ModelHint>>,

    #[serde(rename = "costPriority", skip_serializing_if = "Option::is_none")]
    pub cost_priority: Option<f64>,

    #[serde(rename = "speedPriority", skip_serializing_if = "Option::is_none")]
    pub speed_priority: Option<f64>,

    #[serde(rename = "intelligencePriority", skip_serializing_if = "Option::is_none")]
    pub intelligence_priority: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Result of `sampling/createMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateMessageResult {
    pub role: Role,
    pub content: Content,
    pub model: String,
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_message_round_trip() {
        let request = CreateMessageRequest {
            messages: vec![SamplingMessage::user("hello")],
            max_tokens: Some(64),
            ..Default::default()
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["maxTokens"], json!(64));
        let back: CreateMessageRequest = serde_json::from_value(wire).unwrap();
        assert_eq!(request, back);
    }

    #[test]
    fn test_result_wire_shape() {
        let result = CreateMessageResult {
            role: Role::Assistant,
            content: Content::text("hi"),
            model: "claude-3-7-sonnet".to_string(),
            stop_reason: Some("endTurn".to_string()),
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["stopReason"], json!("endTurn"));
        assert_eq!(wire["role"], json!("assistant"));
    }
}
