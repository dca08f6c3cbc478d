//! Request context handed to every handler.
//!
//! Carries the cancellation token and optional deadline for the request, an
//! immutable chain of hook-attached values (so an authenticated principal is
//! always reachable downstream), a progress reporter bound to the request's
//! `_meta.progressToken`, and the two server-initiated operations
//! (sampling and the tool-call echo) that travel back over the same
//! channel.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use duplex_mcp_core::error::{McpError, McpResult};
use duplex_mcp_core::protocol::{RequestId, methods};
use duplex_mcp_core::types::{
    CallToolRequest, CallToolResult, CreateMessageRequest, CreateMessageResult, LogLevel,
    ProgressNotification, ProgressToken, ProgressValue,
};
use duplex_mcp_core::protocol::JsonRpcNotification;

use crate::session::Session;

/// Immutable typed value chain.
///
/// `insert` returns a new chain sharing the tail, so a hook extends the
/// context without mutating what earlier hooks saw; the engine passes the
/// extended chain to the handler.
#[derive(Clone, Default)]
pub struct Extensions {
    head: Option<Arc<ExtensionNode>>,
}

struct ExtensionNode {
    type_id: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    next: Option<Arc<ExtensionNode>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new chain with `value` prepended. The newest insertion of a type
    /// wins on lookup.
    #[must_use]
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(ExtensionNode {
                type_id: TypeId::of::<T>(),
                value: Arc::new(value),
                next: self.head.clone(),
            })),
        }
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut node = self.head.as_ref();
        while let Some(current) = node {
            if current.type_id == TypeId::of::<T>() {
                return current.value.clone().downcast::<T>().ok();
            }
            node = current.next.as_ref();
        }
        None
    }
}

/// An authenticated caller, attached to the context by an auth hook.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub subject: String,
    pub claims: Value,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            claims: Value::Null,
        }
    }

    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = claims;
        self
    }
}

/// Progress reporter bound to a request's `_meta.progressToken`.
///
/// Without a token every report is a no-op; with one, each report becomes a
/// `$/progress` notification on the session's outbound queue. Reports stop
/// once the request is cancelled.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Option<ProgressInner>,
}

#[derive(Clone)]
struct ProgressInner {
    token: ProgressToken,
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl ProgressReporter {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub(crate) fn new(
        token: Option<ProgressToken>,
        session: Arc<Session>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: token.map(|token| ProgressInner {
                token,
                session,
                cancel,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Report a free-form progress value.
    pub fn report(&self, value: impl Into<ProgressValue>) {
        let Some(inner) = &self.inner else { return };
        if inner.cancel.is_cancelled() {
            return;
        }
        let params = ProgressNotification {
            token: inner.token.clone(),
            value: value.into(),
        };
        let notification = JsonRpcNotification::new(
            methods::NOTIFICATION_PROGRESS,
            serde_json::to_value(params).ok(),
        );
        if inner.session.send_notification(notification).is_err() {
            warn!("progress notification dropped: session closed");
        }
    }

    /// Report a message with a completion percentage.
    pub fn report_percent(&self, message: impl Into<String>, percentage: f64) {
        self.report(ProgressValue::Detailed {
            message: message.into(),
            percentage,
        });
    }
}

/// Context for one incoming request.
#[derive(Clone)]
pub struct RequestContext {
    session: Arc<Session>,
    request_id: Option<RequestId>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    extensions: Extensions,
    progress: ProgressReporter,
}

impl RequestContext {
    pub(crate) fn new(
        session: Arc<Session>,
        request_id: Option<RequestId>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
        extensions: Extensions,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            session,
            request_id,
            cancel,
            deadline,
            extensions,
            progress,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the request is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Typed lookup of a hook-attached value.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extensions.get::<T>()
    }

    /// A new context with `value` attached; the original is untouched.
    #[must_use]
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            extensions: self.extensions.insert(value),
            ..self.clone()
        }
    }

    /// The authenticated principal, if an auth hook attached one.
    pub fn principal(&self) -> Option<Arc<Principal>> {
        self.extensions.get::<Principal>()
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Emit a `notifications/message` event through the session's log gate.
    pub fn log(&self, level: LogLevel, data: Value) {
        self.session.send_log(level, None, data);
    }

    // ---- server-initiated requests ------------------------------------

    /// Ask the client's LLM for a completion (`sampling/createMessage`).
    ///
    /// Fails fast when the client never declared the sampling capability.
    pub async fn create_message(
        &self,
        request: CreateMessageRequest,
    ) -> McpResult<CreateMessageResult> {
        let supports = self
            .session
            .client_capabilities()
            .is_some_and(|caps| caps.supports_sampling());
        if !supports {
            return Err(McpError::invalid_request(
                "client did not declare the sampling capability",
            ));
        }

        let response = self
            .session
            .send_request(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(serde_json::to_value(request)?),
                &self.cancel,
            )
            .await?;

        match response.result {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => Err(McpError::invalid_request(format!(
                "sampling request failed: {}",
                response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "no result".to_string())
            ))),
        }
    }

    /// Ask the client to run one of its own tools (`tools/call` echoed back
    /// over the session).
    pub async fn call_client_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> McpResult<CallToolResult> {
        let request = CallToolRequest::new(name, arguments);
        let response = self
            .session
            .send_request(
                methods::TOOLS_CALL,
                Some(serde_json::to_value(request)?),
                &self.cancel,
            )
            .await?;

        match response.result {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => Err(McpError::invalid_request(format!(
                "client tool call failed: {}",
                response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "no result".to_string())
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_mcp_core::protocol::{JsonRpcMessage, JsonRpcPayload, JsonRpcResponse};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn context_for(session: Arc<Session>) -> RequestContext {
        RequestContext::new(
            session.clone(),
            Some(RequestId::number(1)),
            CancellationToken::new(),
            None,
            Extensions::new(),
            ProgressReporter::disabled(),
        )
    }

    #[test]
    fn test_extensions_chain_is_immutable() {
        let base = Extensions::new();
        let extended = base.insert(Principal::new("alice"));

        assert!(base.get::<Principal>().is_none());
        assert_eq!(extended.get::<Principal>().unwrap().subject, "alice");

        // A later insertion of the same type shadows the earlier one.
        let shadowed = extended.insert(Principal::new("bob"));
        assert_eq!(shadowed.get::<Principal>().unwrap().subject, "bob");
        assert_eq!(extended.get::<Principal>().unwrap().subject, "alice");
    }

    #[tokio::test]
    async fn test_with_value_reaches_handler_view() {
        let (tx, _rx) = mpsc::channel(4);
        let session = Arc::new(Session::new("s", tx));
        let ctx = context_for(session);

        let updated = ctx.with_value(Principal::new("svc@example"));
        assert!(ctx.principal().is_none());
        assert_eq!(updated.principal().unwrap().subject, "svc@example");
    }

    #[tokio::test]
    async fn test_progress_noop_without_token() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = Arc::new(Session::new("s", tx));
        let reporter = ProgressReporter::new(None, session, CancellationToken::new());

        reporter.report("halfway");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_progress_emits_notification_with_token() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = Arc::new(Session::new("s", tx));
        let reporter = ProgressReporter::new(
            Some(ProgressToken::String("p1".to_string())),
            session,
            CancellationToken::new(),
        );

        reporter.report_percent("halfway", 50.0);
        let frame = rx.recv().await.unwrap();
        let JsonRpcPayload::Single(JsonRpcMessage::Notification(n)) = frame else {
            panic!("expected notification");
        };
        assert_eq!(n.method, methods::NOTIFICATION_PROGRESS);
        assert_eq!(n.params.as_ref().unwrap()["token"], json!("p1"));
        assert_eq!(n.params.as_ref().unwrap()["value"]["percentage"], json!(50.0));
    }

    #[tokio::test]
    async fn test_progress_stops_after_cancellation() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = Arc::new(Session::new("s", tx));
        let cancel = CancellationToken::new();
        let reporter = ProgressReporter::new(
            Some(ProgressToken::Number(7)),
            session,
            cancel.clone(),
        );

        cancel.cancel();
        reporter.report("late");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_create_message_requires_capability() {
        let (tx, _rx) = mpsc::channel(4);
        let session = Arc::new(Session::new("s", tx));
        session.store_client_capabilities(serde_json::from_value(json!({})).unwrap());
        let ctx = context_for(session);

        let result = ctx.create_message(CreateMessageRequest::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_call_client_tool_round_trip() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = Arc::new(Session::new("s", tx));
        let ctx = context_for(session.clone());

        let call = tokio::spawn(async move { ctx.call_client_tool("echo", None).await });

        let frame = rx.recv().await.unwrap();
        let JsonRpcPayload::Single(JsonRpcMessage::Request(request)) = frame else {
            panic!("expected outbound request");
        };
        assert_eq!(request.method, methods::TOOLS_CALL);

        session.correlate_response(JsonRpcResponse::success(
            request.id,
            json!({"content": [{"type": "text", "text": "hi"}]}),
        ));

        let result = call.await.unwrap().unwrap();
        assert_eq!(result.content[0].as_text(), Some("hi"));
    }
}
