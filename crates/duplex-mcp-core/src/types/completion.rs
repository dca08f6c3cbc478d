//! Argument autocompletion for prompts and resource templates.

use serde::{Deserialize, Serialize};

/// Completion results are capped to this many values.
pub const MAX_COMPLETION_VALUES: usize = 100;

/// Params of `completion/complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteRequest {
    #[serde(rename = "ref")]
    pub reference: CompletionReference,
    pub argument: CompletionArgument,
}

/// What the completion is for, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CompletionReference {
    #[serde(rename = "ref/prompt")]
    Prompt { name: String },
    #[serde(rename = "ref/resource")]
    Resource { uri: String },
}

/// The argument being completed and the partial value typed so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionArgument {
    pub name: String,
    pub value: String,
}

/// Result of `completion/complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteResult {
    pub completion: Completion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(rename = "hasMore", skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

impl Completion {
    /// Cap to [`MAX_COMPLETION_VALUES`], recording the full total.
    pub fn capped(values: Vec<String>) -> Self {
        let total = values.len() as u64;
        let has_more = values.len() > MAX_COMPLETION_VALUES;
        let values: Vec<String> = values.into_iter().take(MAX_COMPLETION_VALUES).collect();
        Self {
            values,
            total: Some(total),
            has_more: if has_more { Some(true) } else { None },
        }
    }

    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            total: Some(0),
            has_more: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_tagging() {
        let req: CompleteRequest = serde_json::from_value(json!({
            "ref": {"type": "ref/prompt", "name": "greet"},
            "argument": {"name": "language", "value": "py"}
        }))
        .unwrap();
        assert_eq!(
            req.reference,
            CompletionReference::Prompt {
                name: "greet".to_string()
            }
        );
    }

    #[test]
    fn test_capping() {
        let values: Vec<String> = (0..150).map(|i| i.to_string()).collect();
        let completion = Completion::capped(values);
        assert_eq!(completion.values.len(), MAX_COMPLETION_VALUES);
        assert_eq!(completion.total, Some(150));
        assert_eq!(completion.has_more, Some(true));
    }
}
