use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Capabilities a client declares during initialization.
///
/// The list-change flags record the client's interest in the corresponding
/// `*/list_changed` notifications; a session without the flag never receives
/// the broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientCapabilities {
    /// LLM sampling: the client can answer `sampling/createMessage`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,

    /// Tool-call echo: the client can answer server-issued `tools/call`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListChangedCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,

    /// Opaque experimental extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,
}

impl ClientCapabilities {
    pub fn supports_sampling(&self) -> bool {
        self.sampling.is_some()
    }

    pub fn wants_tool_list_changed(&self) -> bool {
        self.tools
            .as_ref()
            .is_some_and(|c| c.list_changed.unwrap_or(false))
    }

    pub fn wants_resource_list_changed(&self) -> bool {
        self.resources
            .as_ref()
            .is_some_and(|c| c.list_changed.unwrap_or(false))
    }

    pub fn wants_prompt_list_changed(&self) -> bool {
        self.prompts
            .as_ref()
            .is_some_and(|c| c.list_changed.unwrap_or(false))
    }
}

/// Capabilities a server advertises in the `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListChangedCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionsCapability>,
}

impl ServerCapabilities {
    /// Advertise everything the runtime implements, with list-change
    /// notifications enabled.
    pub fn full() -> Self {
        Self {
            tools: Some(ListChangedCapability::enabled()),
            resources: Some(ListChangedCapability::enabled()),
            prompts: Some(ListChangedCapability::enabled()),
            logging: Some(LoggingCapability {}),
            completions: Some(CompletionsCapability {}),
        }
    }
}

/// Sampling capability carries no parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SamplingCapability {}

/// A capability whose only knob is `listChanged`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ListChangedCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

impl ListChangedCapability {
    pub fn enabled() -> Self {
        Self {
            list_changed: Some(true),
        }
    }
}

/// Logging capability carries no parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingCapability {}

/// Completions capability carries no parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CompletionsCapability {}
