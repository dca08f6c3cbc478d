//! Wire types for MCP operations.

pub mod completion;
pub mod content;
pub mod notifications;
pub mod prompts;
pub mod resources;
pub mod sampling;
pub mod tools;

use serde::{Deserialize, Serialize};

pub use completion::{
    CompleteRequest, CompleteResult, Completion, CompletionArgument, CompletionReference,
};
pub use content::{Content, ResourceReference};
pub use notifications::{
    CancelledNotification, LogLevel, LogMessageNotification, ProgressNotification, ProgressToken,
    ProgressValue, SetLevelRequest,
};
pub use prompts::{GetPromptRequest, GetPromptResult, Prompt, PromptArgument, PromptMessage, Role};
pub use resources::{
    ReadResourceRequest, ReadResourceResult, Resource, ResourceContents, ResourceTemplateDef,
};
pub use sampling::{CreateMessageRequest, CreateMessageResult, SamplingMessage};
pub use tools::{CallToolRequest, CallToolResult, Tool};

/// Params shared by the four `*/list` operations.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ListRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// One page of a `*/list` result: `{items: […], nextCursor?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn complete(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}
