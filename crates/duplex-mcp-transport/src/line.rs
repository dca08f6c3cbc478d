//! Newline-delimited JSON framing over a duplex byte stream.
//!
//! One UTF-8 JSON payload per line, terminated by exactly one `\n`. Empty
//! lines (consecutive newlines) are collapsed on read. EOF before any bytes
//! is a clean close; EOF after a partial line is logged and surfaces as a
//! close. A line longer than the configured limit is rejected without
//! desynchronizing the stream: the oversized bytes are drained through the
//! terminating newline and the caller gets [`TransportError::FrameTooLarge`].

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use duplex_mcp_core::protocol::JsonRpcPayload;

use crate::{Result, Transport, TransportError};

/// Default maximum frame size: 4 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// A line-framed transport over any duplex byte stream.
pub struct LineTransport<R, W> {
    receiver: LineReceiver<R>,
    sender: LineSender<W>,
}

impl LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Frame over the process's standard streams, the common arrangement for
    /// locally spawned servers.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            receiver: LineReceiver::new(reader),
            sender: LineSender::new(writer),
        }
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.receiver.max_frame_bytes = max;
        self
    }

    /// Receive returns [`TransportError::Cancelled`] once this token fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.receiver.cancel = token;
        self
    }

    /// Separate the reader and writer halves so a dedicated reader task and a
    /// single writer task can run independently.
    pub fn into_split(self) -> (LineReceiver<R>, LineSender<W>) {
        (self.receiver, self.sender)
    }
}

/// An in-memory transport pair wired back to back, for tests.
pub fn pair() -> (
    LineTransport<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    LineTransport<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    (
        LineTransport::new(left_read, left_write),
        LineTransport::new(right_read, right_write),
    )
}

#[async_trait::async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    async fn send(&mut self, payload: JsonRpcPayload) -> Result<()> {
        self.sender.send(&payload).await
    }

    async fn receive(&mut self) -> Result<JsonRpcPayload> {
        let frame = self.receiver.next_frame().await?;
        JsonRpcPayload::parse(&frame)
            .map_err(|e| TransportError::InvalidFrame(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sender.close().await?;
        self.receiver.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.receiver.closed || self.sender.closed
    }
}

/// Reading half: yields raw frame bytes, one line at a time.
///
/// `next_frame` is cancel-safe: partially accumulated bytes live in the
/// receiver, not in the future, so a dropped call loses nothing.
pub struct LineReceiver<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
    cancel: CancellationToken,
    closed: bool,
    /// Bytes of the line being assembled across read calls.
    partial: Vec<u8>,
    /// When draining an oversized line: bytes seen so far.
    oversized: Option<usize>,
}

impl<R: AsyncRead + Send + Unpin> LineReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            cancel: CancellationToken::new(),
            closed: false,
            partial: Vec::new(),
            oversized: None,
        }
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next non-empty line, without the terminating newline.
    ///
    /// The raw bytes go to the engine unparsed so a malformed frame can
    /// still be answered with a ParseError reply.
    pub async fn next_frame(&mut self) -> Result<Vec<u8>> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        loop {
            let cancel = self.cancel.clone();
            let step = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                step = advance_line(
                    &mut self.reader,
                    &mut self.partial,
                    &mut self.oversized,
                    self.max_frame_bytes,
                ) => step?,
            };

            match step {
                LineStep::Eof { partial } => {
                    if partial {
                        warn!("stream ended mid-line, dropping partial frame");
                    }
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
                LineStep::Oversized { size } => {
                    return Err(TransportError::FrameTooLarge {
                        size,
                        max: self.max_frame_bytes,
                    });
                }
                // Collapse consecutive newlines.
                LineStep::Line(line) if line.iter().all(u8::is_ascii_whitespace) => continue,
                LineStep::Line(line) => {
                    trace!(bytes = line.len(), "received frame");
                    return Ok(line);
                }
            }
        }
    }
}

enum LineStep {
    Line(Vec<u8>),
    Oversized { size: usize },
    Eof { partial: bool },
}

/// Advance the line state machine by one completed line (or oversized
/// rejection). All accumulation lives in `partial` / `oversized`, which
/// outlive the call, so dropping the returned future mid-read never loses
/// bytes already consumed from the reader. An oversized line is drained
/// through its newline so the stream stays framed.
async fn advance_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    partial: &mut Vec<u8>,
    oversized: &mut Option<usize>,
    max: usize,
) -> Result<LineStep> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            let mid_line = !partial.is_empty() || oversized.is_some();
            partial.clear();
            *oversized = None;
            return Ok(LineStep::Eof { partial: mid_line });
        }

        let newline = available.iter().position(|&b| b == b'\n');

        if let Some(seen) = oversized.as_mut() {
            // Draining a line already known to exceed the cap.
            match newline {
                Some(pos) => {
                    let size = *seen + pos;
                    *oversized = None;
                    reader.consume(pos + 1);
                    return Ok(LineStep::Oversized { size });
                }
                None => {
                    *seen += available.len();
                    let n = available.len();
                    reader.consume(n);
                    continue;
                }
            }
        }

        match newline {
            Some(pos) => {
                if partial.len() + pos > max {
                    let size = partial.len() + pos;
                    partial.clear();
                    reader.consume(pos + 1);
                    return Ok(LineStep::Oversized { size });
                }
                partial.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                return Ok(LineStep::Line(std::mem::take(partial)));
            }
            None => {
                let chunk = available.len();
                if partial.len() + chunk > max {
                    *oversized = Some(partial.len() + chunk);
                    partial.clear();
                    reader.consume(chunk);
                } else {
                    partial.extend_from_slice(available);
                    reader.consume(chunk);
                }
            }
        }
    }
}

/// Writing half: the sole writer for the stream.
pub struct LineSender<W> {
    writer: BufWriter<W>,
    closed: bool,
}

impl<W: AsyncWrite + Send + Unpin> LineSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            closed: false,
        }
    }

    pub async fn send(&mut self, payload: &JsonRpcPayload) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_vec(payload)?;
        self.writer.write_all(&json).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        trace!(bytes = json.len(), "sent frame");
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.writer.flush().await?;
            self.closed = true;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_mcp_core::protocol::{JsonRpcMessage, JsonRpcRequest, RequestId};
    use serde_json::json;

    fn request_payload(id: i64) -> JsonRpcPayload {
        JsonRpcPayload::Single(JsonRpcMessage::Request(JsonRpcRequest::new(
            RequestId::number(id),
            "ping",
            None,
        )))
    }

    #[tokio::test]
    async fn test_round_trip_over_in_memory_pipe() {
        let (mut left, mut right) = pair();

        left.send(request_payload(1)).await.unwrap();
        let received = right.receive().await.unwrap();
        assert_eq!(received, request_payload(1));
    }

    #[tokio::test]
    async fn test_consecutive_newlines_collapsed() {
        let (client, server) = tokio::io::duplex(4096);
        let (_, mut client_write) = tokio::io::split(client);
        let (server_read, _) = tokio::io::split(server);
        let mut receiver = LineReceiver::new(server_read);

        client_write
            .write_all(b"\n\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n\n")
            .await
            .unwrap();
        client_write.flush().await.unwrap();

        let frame = receiver.next_frame().await.unwrap();
        let payload = JsonRpcPayload::parse(&frame).unwrap();
        assert_eq!(payload, request_payload(1));
    }

    #[tokio::test]
    async fn test_eof_before_bytes_is_clean_close() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _) = tokio::io::split(server);
        let mut receiver = LineReceiver::new(server_read);
        drop(client);

        assert!(matches!(
            receiver.next_frame().await,
            Err(TransportError::Closed)
        ));
        assert!(receiver.is_closed());
    }

    #[tokio::test]
    async fn test_eof_mid_line_reports_close() {
        let (client, server) = tokio::io::duplex(4096);
        let (_, mut client_write) = tokio::io::split(client);
        let (server_read, _) = tokio::io::split(server);
        let mut receiver = LineReceiver::new(server_read);

        client_write.write_all(b"{\"partial\":").await.unwrap();
        client_write.flush().await.unwrap();
        drop(client_write);

        assert!(matches!(
            receiver.next_frame().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_and_stream_resyncs() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_, mut client_write) = tokio::io::split(client);
        let (server_read, _) = tokio::io::split(server);
        let mut receiver = LineReceiver::new(server_read).with_max_frame_bytes(64);

        let huge = format!("{{\"filler\":\"{}\"}}\n", "x".repeat(500));
        client_write.write_all(huge.as_bytes()).await.unwrap();
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n")
            .await
            .unwrap();
        client_write.flush().await.unwrap();

        assert!(matches!(
            receiver.next_frame().await,
            Err(TransportError::FrameTooLarge { .. })
        ));
        // The next well-formed frame still arrives.
        let frame = receiver.next_frame().await.unwrap();
        assert_eq!(JsonRpcPayload::parse(&frame).unwrap(), request_payload(1));
    }

    #[tokio::test]
    async fn test_receive_cancelled_promptly() {
        let (_client, server) = tokio::io::duplex(4096);
        let (server_read, _) = tokio::io::split(server);
        let token = CancellationToken::new();
        let mut receiver = LineReceiver::new(server_read).with_cancellation(token.clone());

        let handle = tokio::spawn(async move { receiver.next_frame().await });
        token.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn test_invalid_json_surfaces_as_invalid_frame() {
        let (client, server) = tokio::io::duplex(4096);
        let (_, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let mut transport = LineTransport::new(server_read, server_write);

        client_write.write_all(b"{oops\n").await.unwrap();
        client_write.flush().await.unwrap();

        assert!(matches!(
            transport.receive().await,
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_frame_round_trip() {
        let (mut left, mut right) = pair();
        let batch = JsonRpcPayload::Batch(vec![
            JsonRpcMessage::Request(JsonRpcRequest::new(RequestId::number(1), "ping", None)),
            JsonRpcMessage::Request(JsonRpcRequest::new(
                RequestId::number(2),
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
            )),
        ]);

        left.send(batch.clone()).await.unwrap();
        assert_eq!(right.receive().await.unwrap(), batch);
    }
}
