//! Hybrid SSE + HTTP POST transport.
//!
//! Server → client frames flow as `message` events on a long-lived
//! `text/event-stream` GET; client → server frames are HTTP POSTs. The
//! session-handshake sub-protocol differs between revisions: the legacy one
//! bootstraps with an `endpoint` event, the newer one with the
//! `Mcp-Session-Id` response header on the `initialize` POST.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{SseClientConfig, SseClientTransport};
pub use server::{SseConnectionHandler, SseServer, SseServerConfig};
pub use wire::{SseDecoder, SseEvent};

/// Session identity header on POST requests and the `initialize` response.
pub const HEADER_SESSION_ID: &str = "Mcp-Session-Id";

/// Query-parameter alternative to [`HEADER_SESSION_ID`].
pub const QUERY_SESSION_ID: &str = "sessionId";

/// SSE event kind carrying one JSON-RPC payload.
pub const EVENT_MESSAGE: &str = "message";

/// SSE event kind carrying the POST URL (legacy bootstrap only).
pub const EVENT_ENDPOINT: &str = "endpoint";
