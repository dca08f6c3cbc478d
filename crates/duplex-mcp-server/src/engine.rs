//! The message dispatch engine.
//!
//! One entry point: [`MessageEngine::handle`] takes a raw inbound frame for
//! a session and returns zero or more outbound frames. The pipeline: parse,
//! classify, correlate responses, run the before-hook chain, enforce the
//! lifecycle state machine, route by method, wrap the result for the
//! negotiated revision, run after-hooks.
//!
//! Requests are tracked in the session's in-flight table for the duration
//! of their handler so a `$/cancelled` notification can reach them; the
//! handler itself runs in a spawned task, which also contains panics (a
//! panicking handler becomes an `InternalError` reply, never a crashed
//! reader).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use duplex_mcp_core::error::{McpError, McpResult, ProtocolError};
use duplex_mcp_core::protocol::{
    InitializeRequest, InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcPayload, JsonRpcRequest, JsonRpcResponse, PayloadParseError, ProtocolVersion,
    RequestId, ServerCapabilities, ServerInfo, SessionState, methods, negotiate,
};
use duplex_mcp_core::types::{
    CallToolRequest, CancelledNotification, CompleteRequest, CompleteResult, GetPromptRequest,
    ListRequest, ProgressToken, ReadResourceRequest, SetLevelRequest,
};

use crate::context::{Extensions, ProgressReporter, RequestContext};
use crate::hooks::HookChain;
use crate::registry::CapabilityRegistry;
use crate::session::Session;

/// The dispatch engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct MessageEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    info: ServerInfo,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    registry: Arc<CapabilityRegistry>,
    hooks: HookChain,
}

impl MessageEngine {
    pub fn new(
        info: ServerInfo,
        capabilities: ServerCapabilities,
        instructions: Option<String>,
        registry: Arc<CapabilityRegistry>,
        hooks: HookChain,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                info,
                capabilities,
                instructions,
                registry,
                hooks,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.inner.registry
    }

    /// Process one raw inbound frame, returning the outbound frames it
    /// produced.
    pub async fn handle(&self, session: &Arc<Session>, raw: &[u8]) -> Vec<JsonRpcPayload> {
        let payload = match JsonRpcPayload::parse(raw) {
            Ok(payload) => payload,
            Err(PayloadParseError::Json(e)) => {
                debug!(session_id = %session.id(), error = %e, "malformed frame");
                return vec![JsonRpcPayload::Single(JsonRpcMessage::Response(
                    JsonRpcResponse::error(None, JsonRpcError::parse_error(e.to_string())),
                ))];
            }
            Err(PayloadParseError::Element(e)) => {
                debug!(session_id = %session.id(), error = %e, "invalid frame element");
                return vec![JsonRpcPayload::Single(JsonRpcMessage::Response(
                    JsonRpcResponse::error(None, JsonRpcError::invalid_request(e.to_string())),
                ))];
            }
        };

        match payload {
            JsonRpcPayload::Single(message) => {
                match self.process_message(session, message).await {
                    Some(reply) => vec![JsonRpcPayload::Single(reply)],
                    None => Vec::new(),
                }
            }
            JsonRpcPayload::Batch(messages) => self.handle_batch(session, messages).await,
        }
    }

    /// Batches are legal only once the newer revision is negotiated. Reply
    /// order mirrors request order; notifications contribute nothing; a
    /// batch with no replies produces no frame at all.
    async fn handle_batch(
        &self,
        session: &Arc<Session>,
        messages: Vec<JsonRpcMessage>,
    ) -> Vec<JsonRpcPayload> {
        if messages.is_empty() {
            return vec![JsonRpcPayload::Single(JsonRpcMessage::Response(
                JsonRpcResponse::error(None, JsonRpcError::invalid_request("empty batch")),
            ))];
        }

        let batching_allowed = session
            .negotiated_version()
            .is_some_and(|v| v.supports_batching());
        if !batching_allowed {
            return vec![JsonRpcPayload::Single(JsonRpcMessage::Response(
                JsonRpcResponse::error(
                    None,
                    JsonRpcError::invalid_request(
                        "batch frames are not supported on the negotiated protocol version",
                    ),
                ),
            ))];
        }

        let mut replies = Vec::new();
        for message in messages {
            if let Some(reply) = self.process_message(session, message).await {
                replies.push(reply);
            }
        }

        if replies.is_empty() {
            Vec::new()
        } else {
            vec![JsonRpcPayload::Batch(replies)]
        }
    }

    async fn process_message(
        &self,
        session: &Arc<Session>,
        message: JsonRpcMessage,
    ) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Response(response) => {
                session.correlate_response(response);
                None
            }
            JsonRpcMessage::Notification(notification) => {
                // Hooks see notifications too; a hook error (or a
                // replacement that is no longer a notification) drops the
                // message, never producing a reply.
                let frame = match serde_json::to_value(&notification) {
                    Ok(frame) => frame,
                    Err(_) => return None,
                };
                match self
                    .inner
                    .hooks
                    .run_before(session, Extensions::new(), frame)
                    .await
                {
                    Ok(outcome) => {
                        match JsonRpcMessage::classify(outcome.frame.clone()) {
                            Ok(JsonRpcMessage::Notification(replaced)) => {
                                self.handle_notification(session, replaced).await;
                            }
                            _ => {
                                warn!(
                                    session_id = %session.id(),
                                    "hook replaced a notification with a non-notification frame, dropped",
                                );
                            }
                        }
                        self.inner
                            .hooks
                            .run_after(session, &outcome.extensions, &outcome.frame, None)
                            .await;
                    }
                    Err(e) => {
                        debug!(session_id = %session.id(), error = %e, "hook rejected notification");
                    }
                }
                None
            }
            JsonRpcMessage::Request(request) => {
                Some(self.handle_request(session, request).await)
            }
        }
    }

    // ---- notifications -------------------------------------------------

    /// Notifications never produce replies, even on error.
    async fn handle_notification(&self, session: &Arc<Session>, n: JsonRpcNotification) {
        match n.method.as_str() {
            methods::NOTIFICATION_INITIALIZED => {
                if session.mark_initialized() {
                    debug!(session_id = %session.id(), "session ready");
                } else {
                    debug!(session_id = %session.id(), "initialized notification out of order, dropped");
                }
            }
            methods::NOTIFICATION_EXIT => {
                debug!(session_id = %session.id(), "exit notification");
                session.close();
            }
            methods::NOTIFICATION_CANCELLED => {
                let Some(params) = n.params else {
                    warn!(session_id = %session.id(), "cancelled notification without params");
                    return;
                };
                match serde_json::from_value::<CancelledNotification>(params) {
                    Ok(cancelled) => {
                        if !session.cancel_request(&cancelled.request_id) {
                            debug!(
                                session_id = %session.id(),
                                request_id = %cancelled.request_id,
                                "cancellation for unknown or completed request",
                            );
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %session.id(), error = %e, "bad cancelled params")
                    }
                }
            }
            methods::NOTIFICATION_PROGRESS => {
                // Client-side progress for a server-initiated request.
                debug!(session_id = %session.id(), "client progress notification");
            }
            other => {
                debug!(session_id = %session.id(), method = other, "ignoring notification");
            }
        }
    }

    // ---- requests ------------------------------------------------------

    /// Every request produces exactly one reply quoting its ID.
    async fn handle_request(
        &self,
        session: &Arc<Session>,
        request: JsonRpcRequest,
    ) -> JsonRpcMessage {
        let id = request.id.clone();

        let frame = match serde_json::to_value(&request) {
            Ok(frame) => frame,
            Err(e) => {
                error!(session_id = %session.id(), error = %e, "unserializable request");
                return error_reply(Some(id), &McpError::internal(e.to_string()));
            }
        };

        // Before-hooks may replace the frame or short-circuit; the handler
        // sees the extensions they attached.
        let (frame, extensions) = match self
            .inner
            .hooks
            .run_before(session, Extensions::new(), frame)
            .await
        {
            Ok(outcome) => (outcome.frame, outcome.extensions),
            Err(e) => {
                let reply = error_reply(Some(id), &e);
                self.inner
                    .hooks
                    .run_after(session, &Extensions::new(), &Value::Null, Some(&reply))
                    .await;
                return reply;
            }
        };

        let request = match reclassify_request(frame.clone(), &id) {
            Ok(request) => request,
            Err(reply) => return reply,
        };

        let state = session.state();
        let reply = if !state.accepts_request(&request.method) {
            let detail = match state {
                SessionState::New | SessionState::AwaitingInitialized => {
                    format!("method {} is not available before initialization", request.method)
                }
                _ => format!("method {} is not available", request.method),
            };
            error_reply(
                Some(request.id.clone()),
                &McpError::invalid_request(detail),
            )
        } else {
            match request.method.as_str() {
                methods::INITIALIZE => self.handle_initialize(session, &request),
                methods::PING => {
                    JsonRpcMessage::Response(JsonRpcResponse::success(request.id.clone(), json!({})))
                }
                _ => {
                    self.dispatch_tracked(session, &request, extensions.clone())
                        .await
                }
            }
        };

        self.inner
            .hooks
            .run_after(session, &extensions, &frame, Some(&reply))
            .await;
        reply
    }

    /// `initialize` is answered synchronously and drives the state machine.
    fn handle_initialize(&self, session: &Arc<Session>, request: &JsonRpcRequest) -> JsonRpcMessage {
        let id = request.id.clone();

        // A second initialize must not disturb the session.
        if session.state() != SessionState::New {
            return error_reply(
                Some(id),
                &McpError::invalid_request("session is already initialized"),
            );
        }

        let params: InitializeRequest = match parse_params(request.params.clone()) {
            Ok(params) => params,
            Err(e) => return error_reply(Some(id), &e),
        };

        let version = match negotiate(&params.protocol_version) {
            Ok(version) => version,
            Err(_) => {
                debug!(
                    session_id = %session.id(),
                    requested = %params.protocol_version,
                    "no mutually supported protocol version",
                );
                // Stay in New: the client may retry with another revision.
                return JsonRpcMessage::Response(JsonRpcResponse::error(
                    Some(id),
                    JsonRpcError::unsupported_protocol_version(
                        &params.protocol_version,
                        &ProtocolVersion::supported_strs(),
                    ),
                ));
            }
        };

        session.set_negotiated_version(version);
        session.store_client_capabilities(params.capabilities);
        session.set_state(SessionState::AwaitingInitialized);
        debug!(
            session_id = %session.id(),
            version = %version,
            client = %params.client_info.name,
            "initialize accepted",
        );

        let result = InitializeResult {
            protocol_version: version.as_str().to_string(),
            server_info: self.inner.info.clone(),
            capabilities: self.inner.capabilities.clone(),
            instructions: self.inner.instructions.clone(),
        };
        match serde_json::to_value(result) {
            Ok(result) => {
                JsonRpcMessage::Response(JsonRpcResponse::success(request.id.clone(), result))
            }
            Err(e) => error_reply(Some(request.id.clone()), &McpError::internal(e.to_string())),
        }
    }

    /// Run a routed request inside the in-flight table, with the handler in
    /// a spawned task so a panic becomes an `InternalError` reply.
    async fn dispatch_tracked(
        &self,
        session: &Arc<Session>,
        request: &JsonRpcRequest,
        extensions: Extensions,
    ) -> JsonRpcMessage {
        let id = request.id.clone();
        let cancel = session.begin_request(id.clone(), &request.method);

        let progress = ProgressReporter::new(
            parse_progress_token(request.progress_token()),
            session.clone(),
            cancel.clone(),
        );
        let ctx = RequestContext::new(
            session.clone(),
            Some(id.clone()),
            cancel.clone(),
            None,
            extensions,
            progress,
        );

        let engine = self.clone();
        let session_for_task = session.clone();
        let request_for_task = request.clone();
        let joined = tokio::spawn(async move {
            engine
                .dispatch(&session_for_task, ctx, &request_for_task)
                .await
        })
        .await;

        session.finish_request(&id);

        match joined {
            Ok(Ok(result)) => {
                JsonRpcMessage::Response(JsonRpcResponse::success(id, result))
            }
            Ok(Err(e)) => error_reply(Some(id), &e),
            Err(join_error) if join_error.is_panic() => {
                error!(
                    session_id = %session.id(),
                    method = %request.method,
                    "handler panicked",
                );
                JsonRpcMessage::Response(JsonRpcResponse::error(
                    Some(id),
                    JsonRpcError::internal_error(),
                ))
            }
            Err(_) => error_reply(Some(id), &McpError::cancelled()),
        }
    }

    /// Method routing for the full `Ready` set.
    async fn dispatch(
        &self,
        session: &Arc<Session>,
        ctx: RequestContext,
        request: &JsonRpcRequest,
    ) -> McpResult<Value> {
        let registry = &self.inner.registry;
        match request.method.as_str() {
            methods::TOOLS_LIST => {
                let params: ListRequest = parse_params_or_default(request.params.clone())?;
                let page = registry.list_tools(params.cursor.as_deref()).await?;
                Ok(serde_json::to_value(page)?)
            }
            methods::TOOLS_CALL => {
                let params: CallToolRequest = parse_params(request.params.clone())?;
                let result = registry
                    .invoke_tool(ctx, &params.name, params.arguments.as_ref())
                    .await?;
                let version = session
                    .negotiated_version()
                    .unwrap_or(ProtocolVersion::LATEST);
                Ok(result.to_wire(version))
            }
            methods::RESOURCES_LIST => {
                let params: ListRequest = parse_params_or_default(request.params.clone())?;
                let page = registry.list_resources(params.cursor.as_deref()).await?;
                Ok(serde_json::to_value(page)?)
            }
            methods::RESOURCES_LIST_TEMPLATES => {
                let params: ListRequest = parse_params_or_default(request.params.clone())?;
                let page = registry
                    .list_resource_templates(params.cursor.as_deref())
                    .await?;
                Ok(serde_json::to_value(page)?)
            }
            methods::RESOURCES_READ => {
                let params: ReadResourceRequest = parse_params(request.params.clone())?;
                let result = registry.read_resource(ctx, &params.uri).await?;
                Ok(serde_json::to_value(result)?)
            }
            methods::PROMPTS_LIST => {
                let params: ListRequest = parse_params_or_default(request.params.clone())?;
                let page = registry.list_prompts(params.cursor.as_deref()).await?;
                Ok(serde_json::to_value(page)?)
            }
            methods::PROMPTS_GET => {
                let params: GetPromptRequest = parse_params(request.params.clone())?;
                let result = registry
                    .get_prompt(ctx, &params.name, params.arguments.as_ref())
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            methods::COMPLETION_COMPLETE => {
                let params: CompleteRequest = parse_params(request.params.clone())?;
                let completion = registry
                    .complete(ctx, &params.reference, params.argument)
                    .await?;
                Ok(serde_json::to_value(CompleteResult { completion })?)
            }
            methods::LOGGING_SET_LEVEL => {
                let params: SetLevelRequest = parse_params(request.params.clone())?;
                session.set_log_level(params.level);
                debug!(session_id = %session.id(), level = ?params.level, "log level changed");
                Ok(json!({}))
            }
            other => Err(McpError::method_not_found(other)),
        }
    }
}

/// Re-classify a hook-replaced frame; it must still be a request.
fn reclassify_request(
    frame: Value,
    original_id: &RequestId,
) -> Result<JsonRpcRequest, JsonRpcMessage> {
    match JsonRpcMessage::classify(frame) {
        Ok(JsonRpcMessage::Request(request)) => Ok(request),
        Ok(_) => Err(error_reply(
            Some(original_id.clone()),
            &McpError::invalid_request("hook replaced a request with a non-request frame"),
        )),
        Err(e) => Err(error_reply(
            Some(original_id.clone()),
            &McpError::invalid_request(format!("hook produced a malformed frame: {e}")),
        )),
    }
}

fn parse_progress_token(value: Option<&Value>) -> Option<ProgressToken> {
    match value {
        Some(Value::String(s)) => Some(ProgressToken::String(s.clone())),
        Some(Value::Number(n)) => n.as_i64().map(ProgressToken::Number),
        _ => None,
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> McpResult<T> {
    let params = params.ok_or_else(|| McpError::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| McpError::invalid_params(e.to_string()))
}

fn parse_params_or_default<T: DeserializeOwned + Default>(params: Option<Value>) -> McpResult<T> {
    match params {
        Some(params) => {
            serde_json::from_value(params).map_err(|e| McpError::invalid_params(e.to_string()))
        }
        None => Ok(T::default()),
    }
}

/// Wrap a handler error exactly once. Coded errors propagate verbatim;
/// opaque errors become a generic `InternalError` with the original logged.
fn error_reply(id: Option<RequestId>, error: &McpError) -> JsonRpcMessage {
    if error.is_opaque() {
        error!(error = %error, "handler error");
    } else if !matches!(error, McpError::Protocol(ProtocolError::MethodNotFound(_))) {
        debug!(error = %error, "request failed");
    }
    JsonRpcMessage::Response(JsonRpcResponse::error(id, JsonRpcError::from(error)))
}
