//! Error taxonomy.
//!
//! Errors fall into three tiers. Protocol errors map to the standard
//! JSON-RPC codes and leave session state alone. Semantic errors map to the
//! MCP positive-offset codes; the session stays healthy. Fatal errors
//! (transport I/O, shutdown) tear the session down and never become replies.
//!
//! Handler errors are wrapped exactly once: a variant that carries a code
//! becomes a JSON-RPC error with that code, anything opaque becomes
//! `InternalError` with a generic message while the original is logged.

use thiserror::Error;

use crate::protocol::jsonrpc::{JsonRpcError, error_codes, mcp_error_codes};

/// Canonical result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("schema error: {0}")]
    Schema(#[from] crate::schema::SchemaError),

    /// An error that already carries its JSON-RPC code; propagated verbatim.
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl McpError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidRequest(msg.into()))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidParams(msg.into()))
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::MethodNotFound(method.into()))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::Internal(msg.into()))
    }

    pub fn session_closed() -> Self {
        Self::Protocol(ProtocolError::SessionClosed)
    }

    pub fn cancelled() -> Self {
        Self::Protocol(ProtocolError::Cancelled)
    }

    /// Whether the reply for this error should be produced by the generic
    /// `InternalError` wrapper rather than a code the error itself carries.
    pub fn is_opaque(&self) -> bool {
        matches!(
            self,
            McpError::Other(_) | McpError::Io(_) | McpError::Serialization(_)
        )
    }
}

/// Errors with a JSON-RPC standard code or a lifecycle meaning.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("request cancelled")]
    Cancelled,

    #[error("session closed")]
    SessionClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic tool failures.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A failure the tool wants surfaced to the model: the RPC reply stays
    /// successful, the result carries `isError` and this message.
    #[error("{0}")]
    Execution(String),
}

/// Semantic resource failures.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("no template matched: {0}")]
    TemplateNotMatched(String),

    #[error("invalid uri: {0}")]
    InvalidUri(String),
}

impl From<&McpError> for JsonRpcError {
    fn from(err: &McpError) -> Self {
        match err {
            McpError::Protocol(p) => match p {
                ProtocolError::InvalidRequest(msg) => JsonRpcError::invalid_request(msg.clone()),
                ProtocolError::InvalidParams(msg) => JsonRpcError::invalid_params(msg.clone()),
                ProtocolError::MethodNotFound(method) => JsonRpcError::method_not_found(method),
                ProtocolError::UnsupportedProtocolVersion(v) => JsonRpcError::new(
                    mcp_error_codes::UNSUPPORTED_PROTOCOL_VERSION,
                    format!("Unsupported protocol version: {v}"),
                ),
                ProtocolError::AuthenticationFailed(msg) => JsonRpcError::new(
                    mcp_error_codes::AUTHENTICATION_FAILED,
                    format!("Authentication failed: {msg}"),
                ),
                ProtocolError::AuthorizationFailed(msg) => JsonRpcError::new(
                    mcp_error_codes::AUTHORIZATION_FAILED,
                    format!("Authorization failed: {msg}"),
                ),
                ProtocolError::RateLimitExceeded => JsonRpcError::new(
                    mcp_error_codes::RATE_LIMIT_EXCEEDED,
                    "Rate limit exceeded",
                ),
                ProtocolError::Cancelled => JsonRpcError::new(
                    error_codes::INTERNAL_ERROR,
                    "Request cancelled",
                ),
                ProtocolError::SessionClosed => JsonRpcError::new(
                    error_codes::INTERNAL_ERROR,
                    "Session closed",
                ),
                ProtocolError::Internal(_) => JsonRpcError::internal_error(),
            },
            McpError::Tool(t) => match t {
                ToolError::NotFound(name) => JsonRpcError::tool_not_found(name),
                ToolError::InvalidArgument(msg) => JsonRpcError::invalid_argument(msg.clone()),
                // Normally surfaced as an isError tool result; if one leaks
                // this far it degrades to a generic internal error.
                ToolError::Execution(_) => JsonRpcError::internal_error(),
            },
            McpError::Resource(r) => match r {
                ResourceError::NotFound(uri) => JsonRpcError::resource_not_found(uri),
                ResourceError::TemplateNotMatched(uri) => JsonRpcError::new(
                    mcp_error_codes::RESOURCE_TEMPLATE_NOT_MATCHED,
                    format!("No resource template matched: {uri}"),
                ),
                ResourceError::InvalidUri(uri) => {
                    JsonRpcError::invalid_params(format!("invalid uri: {uri}"))
                }
            },
            McpError::Schema(s) => JsonRpcError::from(s),
            McpError::Rpc(rpc) => rpc.clone(),
            // Opaque tiers: generic message only, the caller logs the original.
            McpError::Transport(_) | McpError::Serialization(_) | McpError::Io(_)
            | McpError::Other(_) => JsonRpcError::internal_error(),
        }
    }
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        JsonRpcError::from(&err)
    }
}
