//! Protocol revision model and negotiation.
//!
//! Two revisions are supported. The newer one ("2025-03-26") permits batch
//! frames, the structured tool-result variant, and the header-based SSE
//! session handshake. The legacy one ("2024-11-05") uses the `endpoint`
//! bootstrap event and the flat tool-result shape.

use serde::{Deserialize, Serialize};

/// Newer protocol revision
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";
/// Legacy protocol revision
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";

/// A supported MCP protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// "2024-11-05"
    V2024_11_05,
    /// "2025-03-26"
    V2025_03_26,
}

impl ProtocolVersion {
    /// The newest supported revision.
    pub const LATEST: ProtocolVersion = ProtocolVersion::V2025_03_26;

    /// All supported revisions, oldest first.
    pub const SUPPORTED: [ProtocolVersion; 2] =
        [ProtocolVersion::V2024_11_05, ProtocolVersion::V2025_03_26];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V2024_11_05 => PROTOCOL_VERSION_2024_11_05,
            ProtocolVersion::V2025_03_26 => PROTOCOL_VERSION_2025_03_26,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            PROTOCOL_VERSION_2024_11_05 => Some(ProtocolVersion::V2024_11_05),
            PROTOCOL_VERSION_2025_03_26 => Some(ProtocolVersion::V2025_03_26),
            _ => None,
        }
    }

    /// Batch frames are only legal on the newer revision.
    pub fn supports_batching(&self) -> bool {
        matches!(self, ProtocolVersion::V2025_03_26)
    }

    /// `structuredContent` in tool results exists only on the newer revision.
    pub fn supports_structured_content(&self) -> bool {
        matches!(self, ProtocolVersion::V2025_03_26)
    }

    /// The legacy revision bootstraps SSE sessions with an `endpoint` event;
    /// the newer one uses the `Mcp-Session-Id` response header instead.
    pub fn uses_endpoint_event(&self) -> bool {
        matches!(self, ProtocolVersion::V2024_11_05)
    }

    pub fn supported_strs() -> [&'static str; 2] {
        [PROTOCOL_VERSION_2024_11_05, PROTOCOL_VERSION_2025_03_26]
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Select the highest revision supported by both sides.
///
/// The client declares a single revision in `initialize`; a declared revision
/// we also support is the answer. Anything else is a negotiation failure and
/// the session stays uninitialized.
pub fn negotiate(requested: &str) -> Result<ProtocolVersion, VersionNegotiationError> {
    ProtocolVersion::parse(requested)
        .ok_or_else(|| VersionNegotiationError::Unsupported(requested.to_string()))
}

/// Version negotiation failure.
#[derive(Debug, thiserror::Error)]
pub enum VersionNegotiationError {
    #[error("unsupported protocol version: {0}")]
    Unsupported(String),
}
