//! # duplex-mcp-client
//!
//! Client runtime for the duplex-mcp protocol stack. Drives the
//! `initialize` handshake over any [`Transport`], offers typed wrappers for
//! every request method, and, because the channel is symmetric, dispatches
//! server-initiated requests (`sampling/createMessage` and the `tools/call`
//! echo) to registered client-side handlers.
//!
//! A dedicated IO task owns the transport: it drains an outbound command
//! queue and feeds inbound frames to the correlation table, so callers
//! never contend for the connection. Request/response correlation mirrors
//! the server's pending-outbound table: one single-shot slot per request ID,
//! duplicates discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use duplex_mcp_core::error::{McpError, McpResult};
use duplex_mcp_core::protocol::{
    ClientCapabilities, ClientInfo, InitializeRequest, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcNotification, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse,
    ProtocolVersion, RequestId, ServerCapabilities, ServerInfo, methods,
};
use duplex_mcp_core::types::{
    CallToolRequest, CallToolResult, CompleteRequest, CompleteResult, CompletionArgument,
    CompletionReference, CreateMessageRequest, CreateMessageResult, GetPromptRequest,
    GetPromptResult, LogLevel, Page, Prompt, ReadResourceRequest, ReadResourceResult, Resource,
    ResourceTemplateDef, SetLevelRequest, Tool,
};
use duplex_mcp_transport::Transport;

/// Answers server-initiated `sampling/createMessage` requests.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(&self, request: CreateMessageRequest)
    -> McpResult<CreateMessageResult>;
}

/// Answers server-initiated `tools/call` requests (tools the client itself
/// advertises).
#[async_trait]
pub trait ClientToolHandler: Send + Sync {
    async fn call_tool(&self, request: CallToolRequest) -> McpResult<CallToolResult>;
}

/// Intercepts every outbound request before it is sent; may replace it or
/// short-circuit with an error.
#[async_trait]
pub trait BeforeSendRequestHook: Send + Sync {
    async fn before_send_request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcRequest>;
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub info: ClientInfo,
    pub capabilities: ClientCapabilities,
    /// Revision requested in `initialize`.
    pub protocol_version: ProtocolVersion,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            info: ClientInfo {
                name: "duplex-mcp-client".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ClientCapabilities::default(),
            protocol_version: ProtocolVersion::LATEST,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection lifecycle from the client's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Initialized,
    Closed,
}

struct ClientInner {
    config: ClientConfig,
    state: RwLock<ClientState>,
    server_info: RwLock<Option<ServerInfo>>,
    server_capabilities: RwLock<Option<ServerCapabilities>>,
    negotiated_version: RwLock<Option<ProtocolVersion>>,
    outbound: mpsc::Sender<JsonRpcPayload>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicI64,
    sampling_handler: RwLock<Option<Arc<dyn SamplingHandler>>>,
    tool_handler: RwLock<Option<Arc<dyn ClientToolHandler>>>,
    before_send_hooks: Vec<Arc<dyn BeforeSendRequestHook>>,
    notifications: broadcast::Sender<JsonRpcNotification>,
}

/// The MCP client.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

impl McpClient {
    /// Establish the transport's receive channel and spawn the IO task.
    pub async fn connect(
        config: ClientConfig,
        transport: Box<dyn Transport>,
    ) -> McpResult<Self> {
        Self::connect_with_hooks(config, transport, Vec::new()).await
    }

    pub async fn connect_with_hooks(
        config: ClientConfig,
        mut transport: Box<dyn Transport>,
        before_send_hooks: Vec<Arc<dyn BeforeSendRequestHook>>,
    ) -> McpResult<Self> {
        transport
            .establish_receiver()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<JsonRpcPayload>(64);
        let (notifications_tx, _) = broadcast::channel(128);

        let inner = Arc::new(ClientInner {
            config,
            state: RwLock::new(ClientState::Connected),
            server_info: RwLock::new(None),
            server_capabilities: RwLock::new(None),
            negotiated_version: RwLock::new(None),
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            sampling_handler: RwLock::new(None),
            tool_handler: RwLock::new(None),
            before_send_hooks,
            notifications: notifications_tx,
        });

        tokio::spawn(io_loop(transport, outbound_rx, inner.clone()));
        Ok(Self { inner })
    }

    pub async fn state(&self) -> ClientState {
        *self.inner.state.read().await
    }

    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.inner.server_info.read().await.clone()
    }

    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.server_capabilities.read().await.clone()
    }

    pub async fn negotiated_version(&self) -> Option<ProtocolVersion> {
        *self.inner.negotiated_version.read().await
    }

    /// Install the handler for server-initiated sampling.
    pub async fn set_sampling_handler(&self, handler: Arc<dyn SamplingHandler>) {
        *self.inner.sampling_handler.write().await = Some(handler);
    }

    /// Install the handler for server-initiated tool calls.
    pub async fn set_tool_handler(&self, handler: Arc<dyn ClientToolHandler>) {
        *self.inner.tool_handler.write().await = Some(handler);
    }

    /// Subscribe to notifications pushed by the server (progress, log
    /// messages, list changes).
    pub fn notifications(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.inner.notifications.subscribe()
    }

    // ---- lifecycle -----------------------------------------------------

    /// Run the `initialize` handshake and emit the `initialized`
    /// notification.
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        let params = InitializeRequest {
            protocol_version: self.inner.config.protocol_version.as_str().to_string(),
            client_info: self.inner.config.info.clone(),
            capabilities: self.inner.config.capabilities.clone(),
        };

        let result: InitializeResult = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;

        let version = ProtocolVersion::parse(&result.protocol_version).ok_or_else(|| {
            McpError::invalid_request(format!(
                "server selected an unknown protocol version: {}",
                result.protocol_version
            ))
        })?;

        *self.inner.negotiated_version.write().await = Some(version);
        *self.inner.server_info.write().await = Some(result.server_info.clone());
        *self.inner.server_capabilities.write().await = Some(result.capabilities.clone());
        *self.inner.state.write().await = ClientState::Initialized;

        self.notify(methods::NOTIFICATION_INITIALIZED, None).await?;
        debug!(version = %version, server = %result.server_info.name, "client initialized");
        Ok(result)
    }

    /// Close the connection. Pending requests fail with a session-closed
    /// error.
    pub async fn close(&self) -> McpResult<()> {
        *self.inner.state.write().await = ClientState::Closed;
        let _ = self.notify(methods::NOTIFICATION_EXIT, None).await;
        self.inner.pending.lock().await.clear();
        Ok(())
    }

    // ---- typed request surface ----------------------------------------

    pub async fn ping(&self) -> McpResult<()> {
        let _: Value = self.request(methods::PING, None).await?;
        Ok(())
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> McpResult<Page<Tool>> {
        self.request(methods::TOOLS_LIST, Some(json!({"cursor": cursor})))
            .await
    }

    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
    ) -> McpResult<CallToolResult> {
        let params = CallToolRequest::new(name, arguments);
        self.request(methods::TOOLS_CALL, Some(serde_json::to_value(params)?))
            .await
    }

    /// `tools/call` with a progress token attached under `_meta`.
    pub async fn call_tool_with_progress(
        &self,
        name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
        progress_token: Value,
    ) -> McpResult<CallToolResult> {
        let mut params = CallToolRequest::new(name, arguments);
        params.meta = Some(json!({"progressToken": progress_token}));
        self.request(methods::TOOLS_CALL, Some(serde_json::to_value(params)?))
            .await
    }

    pub async fn list_resources(&self, cursor: Option<String>) -> McpResult<Page<Resource>> {
        self.request(methods::RESOURCES_LIST, Some(json!({"cursor": cursor})))
            .await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> McpResult<Page<ResourceTemplateDef>> {
        self.request(
            methods::RESOURCES_LIST_TEMPLATES,
            Some(json!({"cursor": cursor})),
        )
        .await
    }

    pub async fn read_resource(&self, uri: impl Into<String>) -> McpResult<ReadResourceResult> {
        let params = ReadResourceRequest { uri: uri.into() };
        self.request(methods::RESOURCES_READ, Some(serde_json::to_value(params)?))
            .await
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> McpResult<Page<Prompt>> {
        self.request(methods::PROMPTS_LIST, Some(json!({"cursor": cursor})))
            .await
    }

    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
    ) -> McpResult<GetPromptResult> {
        let params = GetPromptRequest {
            name: name.into(),
            arguments,
        };
        self.request(methods::PROMPTS_GET, Some(serde_json::to_value(params)?))
            .await
    }

    pub async fn complete(
        &self,
        reference: CompletionReference,
        argument: CompletionArgument,
    ) -> McpResult<CompleteResult> {
        let params = CompleteRequest {
            reference,
            argument,
        };
        self.request(
            methods::COMPLETION_COMPLETE,
            Some(serde_json::to_value(params)?),
        )
        .await
    }

    pub async fn set_log_level(&self, level: LogLevel) -> McpResult<()> {
        let params = SetLevelRequest { level };
        let _: Value = self
            .request(
                methods::LOGGING_SET_LEVEL,
                Some(serde_json::to_value(params)?),
            )
            .await?;
        Ok(())
    }

    /// Ask the server to abandon an in-flight request.
    pub async fn cancel_request(
        &self,
        request_id: RequestId,
        reason: Option<String>,
    ) -> McpResult<()> {
        self.notify(
            methods::NOTIFICATION_CANCELLED,
            Some(json!({"requestId": request_id, "reason": reason})),
        )
        .await
    }

    // ---- plumbing ------------------------------------------------------

    /// Reserve the next request ID. Exposed so a caller can cancel a call it
    /// issued with [`McpClient::request_with_id`].
    pub fn next_request_id(&self) -> RequestId {
        RequestId::number(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        let id = self.next_request_id();
        self.request_with_id(id, method, params).await
    }

    /// Issue a request under a caller-chosen ID and await the correlated
    /// response.
    pub async fn request_with_id<T: serde::de::DeserializeOwned>(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        if *self.inner.state.read().await == ClientState::Closed {
            return Err(McpError::session_closed());
        }

        let mut request = JsonRpcRequest::new(id, method, params);
        for hook in &self.inner.before_send_hooks {
            request = hook.before_send_request(request).await?;
        }
        // A hook may have replaced the request (including its ID).
        let id = request.id.clone();

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id.clone(), tx);

        let send = self
            .inner
            .outbound
            .send(JsonRpcPayload::Single(JsonRpcMessage::Request(request)))
            .await;
        if send.is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(McpError::session_closed());
        }

        let response = match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(McpError::session_closed()),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                return Err(McpError::Protocol(
                    duplex_mcp_core::error::ProtocolError::Internal(format!(
                        "request {method} timed out"
                    )),
                ));
            }
        };

        match (response.result, response.error) {
            (Some(result), None) => Ok(serde_json::from_value(result)?),
            (None, Some(error)) => Err(McpError::Rpc(error)),
            _ => Err(McpError::invalid_request(
                "response carried neither result nor error",
            )),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.inner
            .outbound
            .send(JsonRpcPayload::Single(JsonRpcMessage::Notification(
                JsonRpcNotification::new(method, params),
            )))
            .await
            .map_err(|_| McpError::session_closed())
    }
}

/// IO task: sole owner of the transport. Drains the outbound queue and
/// dispatches inbound frames.
async fn io_loop(
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::Receiver<JsonRpcPayload>,
    inner: Arc<ClientInner>,
) {
    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(payload) => {
                    if let Err(e) = transport.send(payload).await {
                        warn!(error = %e, "send failed, closing client");
                        break;
                    }
                }
                None => break,
            },
            frame = transport.receive() => match frame {
                Ok(payload) => {
                    for message in payload.messages() {
                        dispatch_inbound(&inner, message).await;
                    }
                }
                Err(duplex_mcp_transport::TransportError::Closed)
                | Err(duplex_mcp_transport::TransportError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "receive failed, closing client");
                    break;
                }
            },
        }
    }

    *inner.state.write().await = ClientState::Closed;
    // Failing the slots wakes every caller with a session-closed error.
    inner.pending.lock().await.clear();
    let _ = transport.close().await;
    debug!("client io loop ended");
}

async fn dispatch_inbound(inner: &Arc<ClientInner>, message: JsonRpcMessage) {
    match message {
        JsonRpcMessage::Response(response) => {
            let Some(id) = response.id.clone() else {
                warn!("discarding response without id");
                return;
            };
            match inner.pending.lock().await.remove(&id) {
                Some(slot) => {
                    let _ = slot.send(response);
                }
                None => warn!(%id, "discarding response with no pending request"),
            }
        }
        JsonRpcMessage::Notification(notification) => {
            let _ = inner.notifications.send(notification);
        }
        JsonRpcMessage::Request(request) => {
            // Server-initiated request: answer it off the IO task.
            let inner = inner.clone();
            tokio::spawn(async move {
                let reply = answer_server_request(&inner, &request).await;
                let _ = inner
                    .outbound
                    .send(JsonRpcPayload::Single(JsonRpcMessage::Response(reply)))
                    .await;
            });
        }
    }
}

async fn answer_server_request(
    inner: &Arc<ClientInner>,
    request: &JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        methods::SAMPLING_CREATE_MESSAGE => {
            let handler = inner.sampling_handler.read().await.clone();
            let Some(handler) = handler else {
                return JsonRpcResponse::error(
                    Some(id),
                    JsonRpcError::method_not_found(methods::SAMPLING_CREATE_MESSAGE),
                );
            };
            let params: CreateMessageRequest =
                match serde_json::from_value(request.params.clone().unwrap_or(json!({}))) {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(
                            Some(id),
                            JsonRpcError::invalid_params(e.to_string()),
                        );
                    }
                };
            match handler.create_message(params).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(_) => JsonRpcResponse::error(Some(id), JsonRpcError::internal_error()),
                },
                Err(e) => JsonRpcResponse::error(Some(id), JsonRpcError::from(e)),
            }
        }
        methods::TOOLS_CALL => {
            let handler = inner.tool_handler.read().await.clone();
            let Some(handler) = handler else {
                return JsonRpcResponse::error(
                    Some(id),
                    JsonRpcError::method_not_found(methods::TOOLS_CALL),
                );
            };
            let params: CallToolRequest =
                match serde_json::from_value(request.params.clone().unwrap_or(json!({}))) {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(
                            Some(id),
                            JsonRpcError::invalid_params(e.to_string()),
                        );
                    }
                };
            match handler.call_tool(params).await {
                Ok(result) => {
                    let version = inner
                        .negotiated_version
                        .read()
                        .await
                        .unwrap_or(ProtocolVersion::LATEST);
                    JsonRpcResponse::success(id, result.to_wire(version))
                }
                Err(e) => JsonRpcResponse::error(Some(id), JsonRpcError::from(e)),
            }
        }
        other => JsonRpcResponse::error(Some(id), JsonRpcError::method_not_found(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_mcp_transport::line::pair;

    #[tokio::test]
    async fn test_request_times_out_without_reply() {
        let (client_side, _server_side) = pair();
        let config = ClientConfig {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let client = McpClient::connect(config, Box::new(client_side)).await.unwrap();

        let result = client.ping().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_server_error_response_surfaces_code() {
        let (client_side, mut server_side) = pair();
        let client = McpClient::connect(ClientConfig::default(), Box::new(client_side))
            .await
            .unwrap();

        let answering = tokio::spawn(async move {
            let payload = server_side.receive().await.unwrap();
            let JsonRpcPayload::Single(JsonRpcMessage::Request(request)) = payload else {
                panic!("expected request");
            };
            server_side
                .send(JsonRpcPayload::Single(JsonRpcMessage::Response(
                    JsonRpcResponse::error(
                        Some(request.id),
                        JsonRpcError::method_not_found(&request.method),
                    ),
                )))
                .await
                .unwrap();
        });

        let result = client.ping().await;
        answering.await.unwrap();
        match result {
            Err(McpError::Rpc(error)) => assert_eq!(error.code, -32601),
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_initiated_tool_call_dispatched() {
        let (client_side, mut server_side) = pair();
        let client = McpClient::connect(ClientConfig::default(), Box::new(client_side))
            .await
            .unwrap();

        struct Echo;
        #[async_trait]
        impl ClientToolHandler for Echo {
            async fn call_tool(&self, request: CallToolRequest) -> McpResult<CallToolResult> {
                let message = request
                    .arguments
                    .as_ref()
                    .and_then(|a| a.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(CallToolResult::text(message))
            }
        }
        client.set_tool_handler(Arc::new(Echo)).await;

        server_side
            .send(JsonRpcPayload::Single(JsonRpcMessage::Request(
                JsonRpcRequest::new(
                    RequestId::number(7),
                    methods::TOOLS_CALL,
                    Some(json!({"name": "echo", "arguments": {"message": "round trip"}})),
                ),
            )))
            .await
            .unwrap();

        let reply = server_side.receive().await.unwrap();
        let JsonRpcPayload::Single(JsonRpcMessage::Response(response)) = reply else {
            panic!("expected response");
        };
        assert_eq!(response.id, Some(RequestId::number(7)));
        assert_eq!(
            response.result.unwrap()["content"][0]["text"],
            json!("round trip")
        );
    }
}
