//! Session lifecycle: the `initialize` handshake and the state machine that
//! gates method availability.

use serde::{Deserialize, Serialize};

use crate::protocol::capabilities::{ClientCapabilities, ServerCapabilities};
use crate::protocol::methods;

/// Params of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeRequest {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,

    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,

    pub capabilities: ServerCapabilities,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Session lifecycle states.
///
/// `New → AwaitingInitialized → Ready → Closed`. A session never leaves
/// `Ready` except by destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, no successful `initialize` yet
    New,
    /// `initialize` answered, waiting for the `initialized` notification
    AwaitingInitialized,
    /// Fully operational
    Ready,
    /// Torn down
    Closed,
}

impl SessionState {
    /// Whether a request with this method is answerable in the state.
    ///
    /// In `New` only `initialize` and `ping` are answered. In
    /// `AwaitingInitialized` requests are rejected outright. `Ready` opens
    /// the full method set.
    pub fn accepts_request(&self, method: &str) -> bool {
        match self {
            SessionState::New => matches!(method, methods::INITIALIZE | methods::PING),
            SessionState::AwaitingInitialized => false,
            SessionState::Ready => true,
            SessionState::Closed => false,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gating_in_new_state() {
        let state = SessionState::New;
        assert!(state.accepts_request(methods::INITIALIZE));
        assert!(state.accepts_request(methods::PING));
        assert!(!state.accepts_request(methods::TOOLS_LIST));
    }

    #[test]
    fn test_gating_awaiting_initialized_rejects_requests() {
        let state = SessionState::AwaitingInitialized;
        assert!(!state.accepts_request(methods::PING));
        assert!(!state.accepts_request(methods::TOOLS_CALL));
    }

    #[test]
    fn test_ready_accepts_everything() {
        assert!(SessionState::Ready.accepts_request(methods::TOOLS_CALL));
        assert!(SessionState::Ready.accepts_request(methods::RESOURCES_READ));
    }

    #[test]
    fn test_initialize_request_wire_shape() {
        let req: InitializeRequest = serde_json::from_value(json!({
            "protocolVersion": "2025-03-26",
            "clientInfo": {"name": "t", "version": "1"},
            "capabilities": {}
        }))
        .unwrap();
        assert_eq!(req.protocol_version, "2025-03-26");
        assert_eq!(req.client_info.name, "t");
    }

    #[test]
    fn test_initialize_result_omits_empty_instructions() {
        let result = InitializeResult {
            protocol_version: "2025-03-26".to_string(),
            server_info: ServerInfo::new("S", "1.0.0"),
            capabilities: ServerCapabilities::default(),
            instructions: None,
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert!(wire.get("instructions").is_none());
        assert_eq!(wire["serverInfo"]["name"], json!("S"));
    }
}
