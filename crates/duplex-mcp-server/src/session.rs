//! Per-client session state.
//!
//! A session owns the outbound queue (it is the sole writer to its
//! transport), the in-flight table for incoming requests, and the
//! pending-outbound table that parks server-initiated requests until the
//! client's response arrives. All tables are session-scoped; nothing here is
//! shared across sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use duplex_mcp_core::error::{McpError, McpResult};
use duplex_mcp_core::protocol::{
    ClientCapabilities, JsonRpcMessage, JsonRpcNotification, JsonRpcPayload, JsonRpcRequest,
    JsonRpcResponse, ProtocolVersion, RequestId, SessionState, methods,
};
use duplex_mcp_core::types::{LogLevel, LogMessageNotification};

/// One in-flight incoming request.
pub struct InFlightRequest {
    pub method: String,
    pub cancel: CancellationToken,
}

/// Per-client session record.
pub struct Session {
    id: String,
    state: RwLock<SessionState>,
    version: RwLock<Option<ProtocolVersion>>,
    client_capabilities: RwLock<Option<ClientCapabilities>>,
    outbound: mpsc::Sender<JsonRpcPayload>,
    in_flight: Mutex<HashMap<RequestId, InFlightRequest>>,
    pending_outbound: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    next_outbound_id: AtomicI64,
    log_level: RwLock<LogLevel>,
    closed: CancellationToken,
}

impl Session {
    pub fn new(id: impl Into<String>, outbound: mpsc::Sender<JsonRpcPayload>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(SessionState::New),
            version: RwLock::new(None),
            client_capabilities: RwLock::new(None),
            outbound,
            in_flight: Mutex::new(HashMap::new()),
            pending_outbound: Mutex::new(HashMap::new()),
            next_outbound_id: AtomicI64::new(1),
            log_level: RwLock::new(LogLevel::default()),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().expect("state lock")
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.write().expect("state lock") = state;
    }

    /// `AwaitingInitialized → Ready`, exactly once. Any other transition
    /// request is a no-op returning false.
    pub fn mark_initialized(&self) -> bool {
        let mut state = self.state.write().expect("state lock");
        if *state == SessionState::AwaitingInitialized {
            *state = SessionState::Ready;
            true
        } else {
            false
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state().is_ready()
    }

    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        *self.version.read().expect("version lock")
    }

    pub fn set_negotiated_version(&self, version: ProtocolVersion) {
        *self.version.write().expect("version lock") = Some(version);
    }

    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.client_capabilities
            .read()
            .expect("capabilities lock")
            .clone()
    }

    pub fn store_client_capabilities(&self, capabilities: ClientCapabilities) {
        *self.client_capabilities.write().expect("capabilities lock") = Some(capabilities);
    }

    pub fn log_level(&self) -> LogLevel {
        *self.log_level.read().expect("log level lock")
    }

    pub fn set_log_level(&self, level: LogLevel) {
        *self.log_level.write().expect("log level lock") = level;
    }

    /// Fires when the session closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    // ---- outbound path -------------------------------------------------

    /// Queue one frame, preserving call order. The queue is bounded; a full
    /// queue closes the session instead of blocking the producer.
    pub fn send_payload(&self, payload: JsonRpcPayload) -> McpResult<()> {
        if self.state().is_closed() {
            return Err(McpError::session_closed());
        }
        match self.outbound.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %self.id, "outbound queue full, closing session");
                self.close();
                Err(McpError::session_closed())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(McpError::session_closed())
            }
        }
    }

    pub fn send_response(&self, response: JsonRpcResponse) -> McpResult<()> {
        self.send_payload(JsonRpcPayload::Single(JsonRpcMessage::Response(response)))
    }

    pub fn send_notification(&self, notification: JsonRpcNotification) -> McpResult<()> {
        self.send_payload(JsonRpcPayload::Single(JsonRpcMessage::Notification(
            notification,
        )))
    }

    /// Emit a `notifications/message` event if `level` clears the session's
    /// configured threshold.
    pub fn send_log(&self, level: LogLevel, logger: Option<String>, data: serde_json::Value) {
        if level < self.log_level() {
            return;
        }
        let params = LogMessageNotification {
            level,
            logger,
            data,
        };
        let notification = JsonRpcNotification::new(
            methods::NOTIFICATION_MESSAGE,
            serde_json::to_value(params).ok(),
        );
        let _ = self.send_notification(notification);
    }

    // ---- server-initiated requests ------------------------------------

    /// Send a request to the client and wait for the correlated response.
    ///
    /// A single-shot reply slot is parked under a fresh session-local ID;
    /// the wait ends on the matching response, on `cancel`, or when the
    /// session closes.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> McpResult<JsonRpcResponse> {
        let id = RequestId::number(self.next_outbound_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending_outbound
            .lock()
            .expect("pending lock")
            .insert(id.clone(), tx);

        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.send_payload(JsonRpcPayload::Single(JsonRpcMessage::Request(request)))
        {
            self.pending_outbound.lock().expect("pending lock").remove(&id);
            return Err(e);
        }

        tokio::select! {
            _ = self.closed.cancelled() => {
                self.pending_outbound.lock().expect("pending lock").remove(&id);
                Err(McpError::session_closed())
            }
            _ = cancel.cancelled() => {
                self.pending_outbound.lock().expect("pending lock").remove(&id);
                Err(McpError::cancelled())
            }
            response = rx => response.map_err(|_| McpError::session_closed()),
        }
    }

    /// Deliver a client response to its parked slot. An unmatched response
    /// is dropped with a warning; a slot can complete only once, later
    /// duplicates land here too and are discarded.
    pub fn correlate_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.clone() else {
            warn!(session_id = %self.id, "discarding response without id");
            return;
        };
        let slot = self.pending_outbound.lock().expect("pending lock").remove(&id);
        match slot {
            Some(slot) => {
                if slot.send(response).is_err() {
                    debug!(session_id = %self.id, %id, "reply slot abandoned before response");
                }
            }
            None => {
                warn!(session_id = %self.id, %id, "discarding response with no pending request");
            }
        }
    }

    // ---- in-flight incoming requests ----------------------------------

    /// Track a new incoming request, returning its cancellation token.
    pub fn begin_request(&self, id: RequestId, method: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.in_flight.lock().expect("in-flight lock").insert(
            id,
            InFlightRequest {
                method: method.to_string(),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Evict the record on completion. Returns false if it was already
    /// evicted by a cancellation.
    pub fn finish_request(&self, id: &RequestId) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock")
            .remove(id)
            .is_some()
    }

    /// Cancel an in-flight request. Cancelling a completed (already evicted)
    /// request has no effect.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        let record = self.in_flight.lock().expect("in-flight lock").remove(id);
        match record {
            Some(record) => {
                debug!(session_id = %self.id, %id, method = %record.method, "cancelling request");
                record.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight lock").len()
    }

    /// Tear the session down: cancel every in-flight context and fail every
    /// pending-outbound slot with a session-closed error.
    pub fn close(&self) {
        {
            let mut state = self.state.write().expect("state lock");
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        for (_, record) in self.in_flight.lock().expect("in-flight lock").drain() {
            record.cancel.cancel();
        }
        // Dropping the slots fails their receivers.
        self.pending_outbound.lock().expect("pending lock").clear();
        self.closed.cancel();
        debug!(session_id = %self.id, "session closed");
    }
}

/// Registry of live sessions, plus the list-changed broadcast fan-out.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .expect("sessions lock")
            .insert(session.id().to_string(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .expect("sessions lock")
            .get(session_id)
            .cloned()
    }

    /// Remove and close a session.
    pub fn unregister(&self, session_id: &str) {
        let session = self
            .sessions
            .write()
            .expect("sessions lock")
            .remove(session_id);
        if let Some(session) = session {
            session.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("sessions lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().expect("sessions lock").is_empty()
    }

    /// Broadcast a notification to every initialized session whose declared
    /// client capabilities pass `wants`.
    pub fn broadcast(
        &self,
        method: &str,
        wants: impl Fn(&ClientCapabilities) -> bool,
    ) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .expect("sessions lock")
            .values()
            .cloned()
            .collect();

        for session in sessions {
            if !session.is_initialized() {
                continue;
            }
            let interested = session
                .client_capabilities()
                .as_ref()
                .map(&wants)
                .unwrap_or(false);
            if interested {
                let _ = session.send_notification(JsonRpcNotification::new(
                    method,
                    Some(serde_json::json!({})),
                ));
            }
        }
    }

    /// Close every session (graceful shutdown).
    pub fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .write()
            .expect("sessions lock")
            .drain()
            .map(|(_, s)| s)
            .collect();
        for session in sessions {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with_queue(capacity: usize) -> (Arc<Session>, mpsc::Receiver<JsonRpcPayload>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Session::new("s-1", tx)), rx)
    }

    #[tokio::test]
    async fn test_initialized_flag_set_exactly_once() {
        let (session, _rx) = session_with_queue(4);
        session.set_state(SessionState::AwaitingInitialized);
        assert!(session.mark_initialized());
        assert!(!session.mark_initialized());
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn test_send_request_correlates_by_exact_id() {
        let (session, mut rx) = session_with_queue(4);
        let cancel = CancellationToken::new();

        let waiter = {
            let session = session.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                session
                    .send_request(methods::SAMPLING_CREATE_MESSAGE, Some(json!({})), &cancel)
                    .await
            })
        };

        // The outbound frame carries the generated ID.
        let sent = rx.recv().await.unwrap();
        let JsonRpcPayload::Single(JsonRpcMessage::Request(request)) = sent else {
            panic!("expected outbound request");
        };

        session.correlate_response(JsonRpcResponse::success(request.id, json!({"ok": true})));
        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_discarded() {
        let (session, _rx) = session_with_queue(4);
        // No pending slot for this ID; must not panic.
        session.correlate_response(JsonRpcResponse::success(RequestId::number(99), json!({})));
    }

    #[tokio::test]
    async fn test_close_fails_pending_outbound_slots() {
        let (session, mut rx) = session_with_queue(4);
        let cancel = CancellationToken::new();

        let waiter = {
            let session = session.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                session.send_request(methods::PING, None, &cancel).await
            })
        };
        let _ = rx.recv().await;

        session.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(McpError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_cancel_request_evicts_and_fires_token() {
        let (session, _rx) = session_with_queue(4);
        let token = session.begin_request(RequestId::number(1), "tools/call");
        assert_eq!(session.in_flight_count(), 1);

        assert!(session.cancel_request(&RequestId::number(1)));
        assert!(token.is_cancelled());
        assert_eq!(session.in_flight_count(), 0);

        // Cancelling a completed request has no effect.
        assert!(!session.cancel_request(&RequestId::number(1)));
    }

    #[tokio::test]
    async fn test_full_outbound_queue_closes_session() {
        let (session, _rx) = session_with_queue(1);
        assert!(session
            .send_notification(JsonRpcNotification::new("n1", None))
            .is_ok());
        // Queue full: the session closes instead of blocking.
        assert!(session
            .send_notification(JsonRpcNotification::new("n2", None))
            .is_err());
        assert!(session.state().is_closed());
    }

    #[tokio::test]
    async fn test_log_below_threshold_suppressed() {
        let (session, mut rx) = session_with_queue(8);
        session.set_log_level(LogLevel::Warn);

        session.send_log(LogLevel::Info, None, json!("quiet"));
        session.send_log(LogLevel::Error, None, json!("loud"));

        let frame = rx.recv().await.unwrap();
        let JsonRpcPayload::Single(JsonRpcMessage::Notification(n)) = frame else {
            panic!("expected notification");
        };
        assert_eq!(n.params.as_ref().unwrap()["data"], json!("loud"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_respects_capability_gate() {
        let manager = SessionManager::new();

        let (interested, mut interested_rx) = session_with_queue(4);
        interested.set_state(SessionState::AwaitingInitialized);
        interested.mark_initialized();
        interested.store_client_capabilities(
            serde_json::from_value(json!({"tools": {"listChanged": true}})).unwrap(),
        );

        let (indifferent, mut indifferent_rx) = session_with_queue(4);
        indifferent.set_state(SessionState::AwaitingInitialized);
        indifferent.mark_initialized();
        indifferent.store_client_capabilities(serde_json::from_value(json!({})).unwrap());

        manager.register(interested.clone());
        manager.register(indifferent.clone());

        manager.broadcast(methods::NOTIFICATION_TOOLS_LIST_CHANGED, |caps| {
            caps.wants_tool_list_changed()
        });

        let frame = interested_rx.recv().await.unwrap();
        let JsonRpcPayload::Single(JsonRpcMessage::Notification(n)) = frame else {
            panic!("expected notification");
        };
        assert_eq!(n.method, methods::NOTIFICATION_TOOLS_LIST_CHANGED);
        assert!(indifferent_rx.try_recv().is_err());
    }
}
