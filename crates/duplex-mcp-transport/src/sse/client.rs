//! Client side of the hybrid SSE + HTTP POST transport.
//!
//! `establish_receiver` performs the GET handshake: it opens the event
//! stream and, on the legacy revision, waits for the `endpoint` event before
//! any POST is allowed. The first `initialize` POST is special on the newer
//! revision: its `200` response carries the `Mcp-Session-Id` header, echoed
//! on every later POST.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use duplex_mcp_core::protocol::{JsonRpcMessage, JsonRpcPayload, ProtocolVersion, methods};

use crate::sse::wire::SseDecoder;
use crate::sse::{EVENT_ENDPOINT, EVENT_MESSAGE, HEADER_SESSION_ID};
use crate::{Result, Transport, TransportError};

/// SSE client configuration.
#[derive(Debug, Clone)]
pub struct SseClientConfig {
    /// Server origin, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    pub sse_path: String,
    pub message_path: String,
    /// Defaults to the newer revision; select the legacy one to drive
    /// `endpoint`-event servers.
    pub protocol_version: ProtocolVersion,
    /// Opaque bearer token forwarded on every request
    pub auth_token: Option<String>,
    pub handshake_timeout: Duration,
}

impl Default for SseClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            sse_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            protocol_version: ProtocolVersion::LATEST,
            auth_token: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl SseClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn legacy(mut self) -> Self {
        self.protocol_version = ProtocolVersion::V2024_11_05;
        self
    }
}

/// Client half of the hybrid transport.
pub struct SseClientTransport {
    config: SseClientConfig,
    http: reqwest::Client,
    inbound: Option<mpsc::Receiver<JsonRpcPayload>>,
    reader: Option<JoinHandle<()>>,
    post_url: Option<Url>,
    session_id: Option<String>,
    /// The initialize reply arrives in the POST body rather than on the
    /// stream; it is parked here for the next `receive`.
    pending_body_reply: Option<JsonRpcPayload>,
    cancel: CancellationToken,
    closed: bool,
}

impl SseClientTransport {
    pub fn new(config: SseClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            inbound: None,
            reader: None,
            post_url: None,
            session_id: None,
            pending_body_reply: None,
            cancel: CancellationToken::new(),
            closed: false,
        }
    }

    /// Session ID learned from the `initialize` response header, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn sse_url(&self) -> Result<Url> {
        let raw = format!("{}{}", self.config.base_url, self.config.sse_path);
        Url::parse(&raw).map_err(|e| TransportError::Handshake(format!("bad sse url {raw}: {e}")))
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl Transport for SseClientTransport {
    /// Open the event stream and finish the revision-specific bootstrap.
    async fn establish_receiver(&mut self) -> Result<()> {
        let sse_url = self.sse_url()?;
        let response = self
            .apply_auth(self.http.get(sse_url.clone()))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Handshake(format!("sse connect failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TransportError::Handshake(format!(
                "sse connect failed with status {}",
                response.status()
            )));
        }

        let (inbound_tx, inbound_rx) = mpsc::channel::<JsonRpcPayload>(64);
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let cancel = self.cancel.clone();

        let reader = tokio::spawn(read_event_stream(
            response,
            inbound_tx,
            endpoint_tx,
            cancel,
        ));
        self.reader = Some(reader);
        self.inbound = Some(inbound_rx);

        if self.config.protocol_version.uses_endpoint_event() {
            // No POST may be emitted until the endpoint event arrives.
            let endpoint = tokio::time::timeout(self.config.handshake_timeout, endpoint_rx)
                .await
                .map_err(|_| TransportError::Handshake("endpoint event timed out".to_string()))?
                .map_err(|_| {
                    TransportError::Handshake("stream closed before endpoint event".to_string())
                })?;
            // Relative URLs resolve against the GET request's full URL.
            let resolved = sse_url.join(&endpoint).map_err(|e| {
                TransportError::Handshake(format!("bad endpoint url {endpoint}: {e}"))
            })?;
            debug!(endpoint = %resolved, "endpoint event received");
            self.post_url = Some(resolved);
        } else {
            let raw = format!("{}{}", self.config.base_url, self.config.message_path);
            self.post_url = Some(Url::parse(&raw).map_err(|e| {
                TransportError::Handshake(format!("bad message url {raw}: {e}"))
            })?);
        }

        Ok(())
    }

    async fn send(&mut self, payload: JsonRpcPayload) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let post_url = self
            .post_url
            .clone()
            .ok_or_else(|| TransportError::Handshake("receiver not established".to_string()))?;

        let is_initialize = matches!(
            &payload,
            JsonRpcPayload::Single(JsonRpcMessage::Request(req)) if req.method == methods::INITIALIZE
        );

        let mut request = self
            .apply_auth(self.http.post(post_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&payload);
        if let Some(session_id) = &self.session_id {
            request = request.header(HEADER_SESSION_ID, session_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("post failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!(
                "post rejected with status {status}"
            )));
        }

        if is_initialize {
            // The initialize reply is in the POST body; its headers carry
            // the session identity for every later POST.
            if let Some(session_id) = response
                .headers()
                .get(HEADER_SESSION_ID)
                .and_then(|v| v.to_str().ok())
            {
                self.session_id = Some(session_id.to_string());
            }
            let reply: JsonRpcPayload = response
                .json()
                .await
                .map_err(|e| TransportError::Http(format!("bad initialize reply: {e}")))?;
            self.pending_body_reply = Some(reply);
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<JsonRpcPayload> {
        if let Some(reply) = self.pending_body_reply.take() {
            return Ok(reply);
        }
        let inbound = self
            .inbound
            .as_mut()
            .ok_or_else(|| TransportError::Handshake("receiver not established".to_string()))?;

        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
            payload = inbound.recv() => payload.ok_or(TransportError::Closed),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Drain the SSE byte stream into decoded frames.
async fn read_event_stream(
    response: reqwest::Response,
    inbound: mpsc::Sender<JsonRpcPayload>,
    endpoint: oneshot::Sender<String>,
    cancel: CancellationToken,
) {
    let mut endpoint = Some(endpoint);
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = stream.next() => match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(error = %e, "sse stream error");
                    break;
                }
                None => break,
            },
        };

        for event in decoder.push(&chunk) {
            match event.event.as_deref() {
                Some(EVENT_ENDPOINT) => {
                    if let Some(tx) = endpoint.take() {
                        let _ = tx.send(event.data);
                    }
                }
                Some(EVENT_MESSAGE) | None => {
                    match JsonRpcPayload::parse(event.data.as_bytes()) {
                        Ok(payload) => {
                            if inbound.send(payload).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping malformed sse frame"),
                    }
                }
                Some(other) => debug!(kind = other, "ignoring unknown sse event"),
            }
        }
    }
}
