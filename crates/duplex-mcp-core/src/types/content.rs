//! Artifact content carried in tool results, resources, and chat messages.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// A single content artifact, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },

    /// Opaque binary payload, base64-encoded
    #[serde(rename = "blob")]
    Blob {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    #[serde(rename = "audio")]
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    #[serde(rename = "resource")]
    Resource { resource: ResourceReference },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn blob(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Content::Blob {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Content::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn audio(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Content::Audio {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn resource(uri: impl Into<String>) -> Self {
        Content::Resource {
            resource: ResourceReference {
                uri: uri.into(),
                description: None,
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Reference to a URI-addressable resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceReference {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_wire_shape() {
        let wire = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(wire, json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn test_blob_is_base64() {
        let content = Content::blob(b"\x00\x01\x02", "application/octet-stream");
        let wire = serde_json::to_value(&content).unwrap();
        assert_eq!(wire["type"], "blob");
        assert_eq!(wire["data"], "AAEC");
        assert_eq!(wire["mimeType"], "application/octet-stream");
    }

    #[test]
    fn test_round_trip() {
        let original = Content::image("aGk=", "image/png");
        let wire = serde_json::to_string(&original).unwrap();
        let back: Content = serde_json::from_str(&wire).unwrap();
        assert_eq!(original, back);
    }
}
