//! Server side of the hybrid SSE + HTTP POST transport.
//!
//! Two endpoints under a configurable base path: a GET that opens the
//! long-lived event stream (server → client) and a POST that carries
//! client → server frames. Session bootstrap depends on the configured
//! protocol revision:
//!
//! - newer: the GET assigns a session ID; the `initialize` POST claims it
//!   and its `200` response carries the ID in the `Mcp-Session-Id` header,
//!   which the client echoes on every later POST;
//! - legacy: the stream opens with a single `endpoint` event whose data is
//!   the URL (with a `sessionId` query parameter) future POSTs must target.
//!
//! Every other POST is acknowledged `204 No Content`; its replies arrive
//! asynchronously as `message` events. Parse failures are `400` with a
//! JSON-RPC error body, an unknown or missing session is `400`, a wrong
//! content type is `415`, an oversized body is `413`, and a wrong method on
//! either path is `405`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use duplex_mcp_core::protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcPayload, JsonRpcResponse, ProtocolVersion, error_codes,
    methods,
};
use duplex_mcp_core::utils::generate_session_id;

use crate::sse::wire::SseEvent;
use crate::sse::{EVENT_ENDPOINT, EVENT_MESSAGE, HEADER_SESSION_ID, QUERY_SESSION_ID};
use crate::{Result, TransportError};

/// SSE server configuration.
#[derive(Debug, Clone)]
pub struct SseServerConfig {
    pub bind_addr: SocketAddr,
    /// Prefix for both endpoints, e.g. `/mcp`
    pub base_path: String,
    pub sse_path: String,
    pub message_path: String,
    /// Outbound frames buffered per session before the session is closed
    pub queue_capacity: usize,
    pub max_body_bytes: usize,
    /// Governs session bootstrap: the legacy revision emits the `endpoint`
    /// event, the newer one uses the session-ID header handshake.
    pub protocol_version: ProtocolVersion,
    pub cors_enabled: bool,
}

impl Default for SseServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().expect("static addr"),
            base_path: String::new(),
            sse_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            queue_capacity: 64,
            max_body_bytes: 4 * 1024 * 1024,
            protocol_version: ProtocolVersion::LATEST,
            cors_enabled: true,
        }
    }
}

/// Engine-facing callbacks for inbound SSE traffic.
///
/// `on_message` returns the frames to deliver back for this POST: the
/// `initialize` reply rides in the POST body, everything else is enqueued
/// onto the session's event stream by the server.
#[async_trait]
pub trait SseConnectionHandler: Send + Sync + 'static {
    /// A stream was accepted: the session is registered and `outbound` is
    /// its event queue.
    async fn on_open(&self, session_id: &str, outbound: mpsc::Sender<JsonRpcPayload>);

    /// A POST arrived for the session. Returns zero or more reply frames.
    async fn on_message(&self, session_id: &str, raw: &[u8]) -> Vec<JsonRpcPayload>;

    /// The stream closed (disconnect, overflow close, or shutdown).
    async fn on_close(&self, session_id: &str);
}

struct SessionEntry {
    outbound: mpsc::Sender<JsonRpcPayload>,
    cancel: CancellationToken,
}

struct ServerState {
    config: SseServerConfig,
    handler: Arc<dyn SseConnectionHandler>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    /// GET-accept order of sessions not yet claimed by an initialize POST.
    unclaimed: Mutex<Vec<String>>,
    shutdown: CancellationToken,
}

/// The hybrid transport's server half.
pub struct SseServer {
    state: Arc<ServerState>,
}

impl SseServer {
    pub fn new(config: SseServerConfig, handler: Arc<dyn SseConnectionHandler>) -> Self {
        Self {
            state: Arc::new(ServerState {
                config,
                handler,
                sessions: Mutex::new(HashMap::new()),
                unclaimed: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Cancelling this token stops `serve` and ends every open stream.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Close one session: its stream ends and it is unregistered.
    pub fn close_session(&self, session_id: &str) {
        let entry = self.state.sessions.lock().expect("sessions lock").remove(session_id);
        if let Some(entry) = entry {
            entry.cancel.cancel();
        }
    }

    /// Build the axum router for the two endpoints.
    pub fn router(&self) -> Router {
        let config = &self.state.config;
        let sse_route = format!("{}{}", config.base_path, config.sse_path);
        let message_route = format!("{}{}", config.base_path, config.message_path);

        let mut router = Router::new()
            .route(&sse_route, get(handle_sse_open))
            .route(&message_route, post(handle_message_post))
            .layer(DefaultBodyLimit::max(config.max_body_bytes))
            .with_state(self.state.clone());

        if config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn serve(self) -> Result<()> {
        let addr = self.state.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Http(format!("failed to bind {addr}: {e}")))?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already-bound listener (how tests get an ephemeral port).
    pub async fn serve_with_listener(self, listener: tokio::net::TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "sse transport listening");
        }
        let shutdown = self.state.shutdown.clone();
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| TransportError::Http(format!("server failed: {e}")))?;
        Ok(())
    }
}

#[derive(serde::Deserialize, Default)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn handle_sse_open(State(state): State<Arc<ServerState>>) -> Response {
    let session_id = generate_session_id();
    let (tx, rx) = mpsc::channel::<JsonRpcPayload>(state.config.queue_capacity);
    let cancel = state.shutdown.child_token();

    state.sessions.lock().expect("sessions lock").insert(
        session_id.clone(),
        SessionEntry {
            outbound: tx.clone(),
            cancel: cancel.clone(),
        },
    );
    if !state.config.protocol_version.uses_endpoint_event() {
        state
            .unclaimed
            .lock()
            .expect("unclaimed lock")
            .push(session_id.clone());
    }
    state.handler.on_open(&session_id, tx).await;
    info!(session_id = %session_id, "sse stream opened");

    let bootstrap = state.config.protocol_version.uses_endpoint_event().then(|| {
        let url = format!(
            "{}{}?{}={}",
            state.config.base_path,
            state.config.message_path,
            QUERY_SESSION_ID,
            urlencoding::encode(&session_id),
        );
        SseEvent::new(EVENT_ENDPOINT, url)
    });

    let stream = session_event_stream(state.clone(), session_id, rx, cancel, bootstrap);
    let body = axum::body::Body::from_stream(stream);

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// The per-session event stream: optional `endpoint` bootstrap event, then
/// one `message` event per outbound frame, flushed per event. Ends on
/// disconnect, cancellation, or queue teardown, unregistering the session.
fn session_event_stream(
    state: Arc<ServerState>,
    session_id: String,
    mut rx: mpsc::Receiver<JsonRpcPayload>,
    cancel: CancellationToken,
    bootstrap: Option<SseEvent>,
) -> impl futures::Stream<Item = std::result::Result<Bytes, Infallible>> {
    async_stream(move |yielder| async move {
        let _guard = StreamGuard {
            state: state.clone(),
            session_id: session_id.clone(),
        };

        if let Some(event) = bootstrap {
            if yielder.send(Bytes::from(event.encode())).await.is_err() {
                return;
            }
        }

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let data = match serde_json::to_string(&message) {
                Ok(data) => data,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "dropping unserializable frame");
                    continue;
                }
            };
            let event = SseEvent::new(EVENT_MESSAGE, data);
            if yielder.send(Bytes::from(event.encode())).await.is_err() {
                break;
            }
        }
    })
}

/// Unregisters the session when the stream future is dropped, whatever the
/// cause of the drop.
struct StreamGuard {
    state: Arc<ServerState>,
    session_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let session_id = self.session_id.clone();
        state
            .sessions
            .lock()
            .expect("sessions lock")
            .remove(&session_id);
        state
            .unclaimed
            .lock()
            .expect("unclaimed lock")
            .retain(|id| id != &session_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                state.handler.on_close(&session_id).await;
                debug!(session_id = %session_id, "sse stream closed");
            });
        }
    }
}

/// Bridge an async producer into a `Stream` through a small channel.
fn async_stream<F, Fut>(
    producer: F,
) -> impl futures::Stream<Item = std::result::Result<Bytes, Infallible>>
where
    F: FnOnce(mpsc::Sender<Bytes>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Bytes>(8);
    tokio::spawn(producer(tx));
    futures::StreamExt::map(ReceiverStream::new(rx), Ok)
}

async fn handle_message_post(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !content_type_is_json(&headers) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }

    // Recover the target session before touching the body: header first,
    // then the query parameter.
    let session_id = headers
        .get(HEADER_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.session_id);

    let is_initialize = frame_is_initialize(&body);

    let session_id = match session_id {
        Some(id) => {
            if !state.sessions.lock().expect("sessions lock").contains_key(&id) {
                return invalid_params_response(format!("unknown session: {id}"));
            }
            if is_initialize {
                // The client addressed its session explicitly; it is no
                // longer up for claiming.
                state
                    .unclaimed
                    .lock()
                    .expect("unclaimed lock")
                    .retain(|unclaimed| unclaimed != &id);
            }
            id
        }
        None if is_initialize => {
            // Newer-revision bootstrap: the initialize POST arrives before
            // the client has seen its session ID, so it claims the oldest
            // stream still awaiting one.
            match claim_unclaimed_session(&state) {
                Some(id) => id,
                None => return invalid_params_response("no session awaiting initialization"),
            }
        }
        None => return invalid_params_response("missing session id"),
    };

    let replies = state.handler.on_message(&session_id, &body).await;

    // A parse failure comes back from the engine as a lone ParseError reply;
    // the POST is answered 400 with that body.
    if let [JsonRpcPayload::Single(JsonRpcMessage::Response(resp))] = replies.as_slice() {
        if resp
            .error
            .as_ref()
            .is_some_and(|e| e.code == error_codes::PARSE_ERROR)
        {
            return (StatusCode::BAD_REQUEST, axum::Json(resp.clone())).into_response();
        }
    }

    if is_initialize {
        // The initialize reply rides in the POST body so the client can read
        // the session-ID header synchronously.
        let Some(JsonRpcPayload::Single(JsonRpcMessage::Response(resp))) =
            replies.into_iter().next()
        else {
            return invalid_params_response("initialize produced no reply");
        };
        return (
            StatusCode::OK,
            [(HEADER_SESSION_ID, session_id.clone())],
            axum::Json(resp),
        )
            .into_response();
    }

    // Everything else is delivered over the stream.
    let outbound = {
        let sessions = state.sessions.lock().expect("sessions lock");
        sessions.get(&session_id).map(|entry| entry.outbound.clone())
    };
    if let Some(outbound) = outbound {
        for reply in replies {
            if outbound.try_send(reply).is_err() {
                warn!(session_id = %session_id, "outbound queue full, closing session");
                close_session_by_id(&state, &session_id);
                break;
            }
        }
    }

    StatusCode::NO_CONTENT.into_response()
}

fn claim_unclaimed_session(state: &Arc<ServerState>) -> Option<String> {
    let mut unclaimed = state.unclaimed.lock().expect("unclaimed lock");
    if unclaimed.is_empty() {
        return None;
    }
    Some(unclaimed.remove(0))
}

fn close_session_by_id(state: &Arc<ServerState>, session_id: &str) {
    let entry = state
        .sessions
        .lock()
        .expect("sessions lock")
        .remove(session_id);
    if let Some(entry) = entry {
        entry.cancel.cancel();
    }
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(';').next().is_some_and(|t| t.trim() == "application/json"))
}

fn frame_is_initialize(body: &[u8]) -> bool {
    matches!(
        JsonRpcPayload::parse(body),
        Ok(JsonRpcPayload::Single(JsonRpcMessage::Request(req))) if req.method == methods::INITIALIZE
    )
}

fn invalid_params_response(detail: impl Into<String>) -> Response {
    let body = JsonRpcResponse::error(None, JsonRpcError::invalid_params(detail.into()));
    (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_check_accepts_charset_suffix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(content_type_is_json(&headers));

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!content_type_is_json(&headers));
    }

    #[test]
    fn test_frame_is_initialize() {
        assert!(frame_is_initialize(
            br#"{"jsonrpc":"2.0","method":"initialize","id":1,"params":{}}"#
        ));
        assert!(!frame_is_initialize(
            br#"{"jsonrpc":"2.0","method":"ping","id":1}"#
        ));
        assert!(!frame_is_initialize(b"{garbage"));
    }

    #[test]
    fn test_default_config_paths() {
        let config = SseServerConfig::default();
        assert_eq!(config.sse_path, "/sse");
        assert_eq!(config.message_path, "/message");
        assert_eq!(config.protocol_version, ProtocolVersion::LATEST);
    }
}
