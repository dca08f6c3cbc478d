//! # duplex-mcp-transport
//!
//! Transport layer for the duplex-mcp runtime. Two protocol-aware framings
//! are provided:
//!
//! - [`line::LineTransport`]: newline-delimited JSON over any duplex byte
//!   stream (stdio, TCP, an in-memory pipe). One frame per line, one
//!   trailing newline per frame.
//! - [`sse`]: the hybrid channel: a long-lived Server-Sent-Events stream
//!   for server→client frames and HTTP POST for client→server frames, with
//!   the session-handshake sub-protocol that differs between the two MCP
//!   revisions.
//!
//! A [`Transport`] is the client-facing contract: sequential `send` /
//! `receive` over an established channel. Server loops consume the split
//! halves of a [`line::LineTransport`] or mount the [`sse::SseServer`]
//! router instead, so the reader task and the single writer task can run
//! independently.

pub mod line;
pub mod sse;

use async_trait::async_trait;
use thiserror::Error;

use duplex_mcp_core::protocol::JsonRpcPayload;

pub use line::{LineReceiver, LineSender, LineTransport};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport failures.
///
/// `Closed` is the clean end of a connection. Everything else is either a
/// recoverable frame-level failure (the caller may reply and keep reading)
/// or a fatal I/O failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("receive cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A bidirectional MCP channel.
///
/// `receive` must be promptly cancellable: implementations watch a
/// cancellation token and return [`TransportError::Cancelled`] once it
/// fires, even mid-read.
#[async_trait]
pub trait Transport: Send {
    /// Queue one frame for delivery, in call order.
    async fn send(&mut self, payload: JsonRpcPayload) -> Result<()>;

    /// Wait for the next inbound frame.
    async fn receive(&mut self) -> Result<JsonRpcPayload>;

    /// Perform any handshake needed before frames can flow.
    ///
    /// A no-op for byte streams; the SSE client performs the GET handshake
    /// (and, on the legacy revision, waits for the `endpoint` event) here.
    async fn establish_receiver(&mut self) -> Result<()> {
        Ok(())
    }

    /// Tear the channel down.
    async fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
