//! # duplex-mcp-core
//!
//! Protocol core for the duplex-mcp runtime: JSON-RPC 2.0 framing, the two
//! supported MCP revisions and their negotiation, capability declarations,
//! lifecycle states, wire types for every operation, declared input schemas
//! with argument binding, URI templates, and pagination.
//!
//! This crate is transport- and runtime-agnostic; the engine, registry, and
//! transports build on it from the `duplex-mcp-server`, `duplex-mcp-client`,
//! and `duplex-mcp-transport` crates.
//!
//! ## Message model
//!
//! A wire frame parses into a [`protocol::JsonRpcPayload`]: either a single
//! classified [`protocol::JsonRpcMessage`] or, on the newer revision, an
//! ordered batch. Requests carry a [`protocol::RequestId`] whose scalar type
//! (string or number) is preserved on the reply.
//!
//! ## Schemas
//!
//! Tools declare their input shape with [`schema::InputSchema`]; the
//! declaration renders the JSON-Schema published by `tools/list` and drives
//! [`schema::bind_arguments`], which validates a call's argument map and
//! reports every violation at once:
//!
//! ```rust
//! use duplex_mcp_core::schema::{FieldSpec, InputSchema, bind_arguments};
//! use serde_json::json;
//!
//! let schema = InputSchema::new()
//!     .field(FieldSpec::string("message").description("Text to echo").required())
//!     .unwrap();
//!
//! let args = json!({"message": "hi"});
//! let bound = bind_arguments(&schema, args.as_object()).unwrap();
//! assert_eq!(bound["message"], json!("hi"));
//! ```

pub mod error;
pub mod protocol;
pub mod schema;
pub mod types;
pub mod uri_template;
pub mod utils;

pub use error::{McpError, McpResult, ProtocolError, ResourceError, ToolError};
pub use protocol::{
    ClientCapabilities, ClientInfo, InitializeRequest, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcNotification, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse,
    ProtocolVersion, RequestId, ServerCapabilities, ServerInfo, SessionState,
};
pub use uri_template::{TemplateBindings, UriTemplate};
