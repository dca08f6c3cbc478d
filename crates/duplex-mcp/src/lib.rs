//! # duplex-mcp
//!
//! A bidirectional Model Context Protocol (MCP) runtime: a JSON-RPC 2.0
//! engine mediating between a host process that exposes capabilities
//! (tools, resources, prompts) and clients that invoke them, over two
//! protocol revisions and two protocol-aware transports.
//!
//! This crate re-exports the whole stack:
//!
//! - [`core`]: wire types, revisions and negotiation, declared input
//!   schemas with argument binding, URI templates, pagination
//! - [`transport`]: newline-delimited JSON over any duplex byte stream,
//!   and the hybrid SSE + HTTP POST channel with its session handshake
//! - [`server`]: sessions, the dispatch engine, the capability registry,
//!   hooks, and server-initiated requests (sampling, client tool calls)
//! - [`client`]: handshake driver, typed request wrappers, and dispatch of
//!   server-initiated requests to client-side handlers
//!
//! Most applications only need the [`prelude`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duplex_mcp::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::builder().name("echo-server").version("1.0.0").build();
//!
//!     let schema = InputSchema::new()
//!         .field(FieldSpec::string("message").description("Text to echo").required())?;
//!     server
//!         .register_tool("echo", "Echo a message back", schema, Arc::new(ToolFn(
//!             |_ctx, args: serde_json::Map<String, serde_json::Value>| async move {
//!                 let message = args["message"].as_str().unwrap_or_default().to_string();
//!                 Ok::<_, McpError>(CallToolResult::text(message))
//!             },
//!         )))
//!         .await?;
//!
//!     server.serve_line(LineTransport::stdio()).await?;
//!     Ok(())
//! }
//! ```

pub use duplex_mcp_client as client;
pub use duplex_mcp_core as core;
pub use duplex_mcp_server as server;
pub use duplex_mcp_transport as transport;

pub mod prelude;
