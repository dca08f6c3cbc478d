//! Server-Sent-Events wire grammar: encoding for the server side and an
//! incremental decoder for the client side.
//!
//! Events are blocks of `field: value` lines terminated by a blank line.
//! Multiple `data:` lines within one block join with `\n`. Comment lines
//! (leading `:`) and unknown fields are ignored.

use bytes::BytesMut;

/// One SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Event kind (`event:` field); absent means the default kind
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Encode with the blank-line terminator.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental SSE decoder fed from arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line) = self.take_line() {
            if line.is_empty() {
                if !self.data_lines.is_empty() || self.event.is_some() {
                    events.push(SseEvent {
                        event: self.event.take(),
                        data: self.data_lines.join("\n"),
                    });
                    self.data_lines.clear();
                }
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };

            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data_lines.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line = self.buffer.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_message_event() {
        let event = SseEvent::new("message", r#"{"jsonrpc":"2.0"}"#);
        assert_eq!(
            event.encode(),
            "event: message\ndata: {\"jsonrpc\":\"2.0\"}\n\n"
        );
    }

    #[test]
    fn test_decode_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: endpoint\ndata: /message?sessionId=abc\n\n");
        assert_eq!(
            events,
            vec![SseEvent::new("endpoint", "/message?sessionId=abc")]
        );
    }

    #[test]
    fn test_decode_across_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: mess").is_empty());
        assert!(decoder.push(b"age\ndata: {}").is_empty());
        let events = decoder.push(b"\n\n");
        assert_eq!(events, vec![SseEvent::new("message", "{}")]);
    }

    #[test]
    fn test_multi_line_data_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn test_comments_and_crlf_tolerated() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\r\nevent: message\r\ndata: {}\r\n\r\n");
        assert_eq!(events, vec![SseEvent::new("message", "{}")]);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let original = SseEvent::new("message", "{\"a\":1}");
        let mut decoder = SseDecoder::new();
        let events = decoder.push(original.encode().as_bytes());
        assert_eq!(events, vec![original]);
    }
}
