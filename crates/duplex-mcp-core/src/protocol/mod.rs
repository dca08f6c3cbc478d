//! MCP protocol layer: JSON-RPC framing, revisions, capabilities, lifecycle.

pub mod capabilities;
pub mod jsonrpc;
pub mod lifecycle;
pub mod methods;
pub mod version;

/// JSON-RPC version string used in every frame
pub const JSONRPC_VERSION: &str = "2.0";

pub use capabilities::{ClientCapabilities, ListChangedCapability, ServerCapabilities};
pub use jsonrpc::{
    ClassifyError, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcPayload,
    JsonRpcRequest, JsonRpcResponse, PayloadParseError, RequestId, error_codes, mcp_error_codes,
};
pub use lifecycle::{
    ClientInfo, InitializeRequest, InitializeResult, ServerInfo, SessionState,
};
pub use version::{ProtocolVersion, VersionNegotiationError, negotiate};
