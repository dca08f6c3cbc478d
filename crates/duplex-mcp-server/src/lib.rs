//! # duplex-mcp-server
//!
//! The server side of the duplex-mcp runtime: per-client [`Session`]s, the
//! [`MessageEngine`] dispatch pipeline, the [`CapabilityRegistry`] of
//! tools / resources / templates / prompts, hook chains, and the request
//! context through which handlers reach cancellation, progress reporting,
//! and the server-initiated operations (sampling, client tool calls).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duplex_mcp_core::schema::{FieldSpec, InputSchema};
//! use duplex_mcp_core::types::CallToolResult;
//! use duplex_mcp_server::{McpServer, registry::ToolFn};
//! use duplex_mcp_transport::LineTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::builder()
//!         .name("example-server")
//!         .version("1.0.0")
//!         .build();
//!
//!     let schema = InputSchema::new()
//!         .field(FieldSpec::string("message").description("Text to echo").required())?;
//!     server
//!         .register_tool("echo", "Echo a message back", schema, Arc::new(ToolFn(
//!             |_ctx, args: serde_json::Map<String, serde_json::Value>| async move {
//!                 let message = args["message"].as_str().unwrap_or_default().to_string();
//!                 Ok::<_, duplex_mcp_core::error::McpError>(CallToolResult::text(message))
//!             },
//!         )))
//!         .await?;
//!
//!     server.serve_line(LineTransport::stdio()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Serving
//!
//! [`McpServer::serve_line`] drives a newline-delimited transport: one
//! dedicated reader task per connection, one writer task draining the
//! session's bounded outbound queue, and a spawned handling task per frame
//! so a long-running tool never blocks the reader (that is what lets a
//! `$/cancelled` notification reach it). [`McpServer::serve_sse`] mounts
//! the hybrid SSE + POST endpoints and feeds the same engine.

pub mod context;
pub mod engine;
pub mod hooks;
pub mod registry;
pub mod session;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duplex_mcp_core::error::{McpError, McpResult};
use duplex_mcp_core::protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcPayload, JsonRpcResponse, ServerCapabilities, ServerInfo,
    methods,
};
use duplex_mcp_core::schema::InputSchema;
use duplex_mcp_core::utils::{DEFAULT_PAGE_SIZE, generate_session_id};
use duplex_mcp_transport::sse::{SseConnectionHandler, SseServer, SseServerConfig};
use duplex_mcp_transport::{LineTransport, TransportError};

pub use context::{Extensions, Principal, ProgressReporter, RequestContext};
pub use engine::MessageEngine;
pub use hooks::{AfterMessageHook, BeforeMessageHook, HookChain, HookOutcome};
pub use registry::{
    CapabilityKind, CapabilityRegistry, CompletionHandler, PromptHandler, ResourceHandler,
    TemplateHandler, ToolHandler,
};
pub use session::{Session, SessionManager};

/// The MCP server: engine, registry, and live sessions.
#[derive(Clone)]
pub struct McpServer {
    engine: MessageEngine,
    sessions: Arc<SessionManager>,
    registry: Arc<CapabilityRegistry>,
    queue_capacity: usize,
    shutdown: CancellationToken,
}

impl McpServer {
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::default()
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn engine(&self) -> &MessageEngine {
        &self.engine
    }

    /// Register a tool; connected interested sessions get
    /// `tools/list_changed`.
    pub async fn register_tool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: InputSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> McpResult<()> {
        self.registry
            .register_tool(name, description, schema, handler)
            .await
    }

    pub async fn register_resource(
        &self,
        uri: impl Into<String>,
        description: impl Into<String>,
        mime_type: Option<String>,
        handler: Arc<dyn ResourceHandler>,
    ) -> McpResult<()> {
        self.registry
            .register_resource(uri, description, mime_type, handler)
            .await
    }

    pub async fn register_resource_template(
        &self,
        pattern: &str,
        description: impl Into<String>,
        handler: Arc<dyn TemplateHandler>,
    ) -> McpResult<()> {
        self.registry
            .register_resource_template(pattern, description, handler)
            .await
    }

    pub async fn register_prompt(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: InputSchema,
        handler: Arc<dyn PromptHandler>,
    ) -> McpResult<()> {
        self.registry
            .register_prompt(name, description, schema, handler)
            .await
    }

    /// Graceful shutdown: close every session (failing their pending
    /// server-initiated requests) and stop the serve loops.
    pub fn shutdown(&self) {
        info!("server shutting down");
        self.shutdown.cancel();
        self.sessions.close_all();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Drive one line-framed connection to completion.
    ///
    /// The reader task feeds frames to the engine (one spawned handling
    /// task per frame) while a single writer task drains the session's
    /// outbound queue, preserving send order.
    pub async fn serve_line<R, W>(&self, transport: LineTransport<R, W>) -> McpResult<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (mut receiver, mut sender) = transport.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<JsonRpcPayload>(self.queue_capacity);

        let session = Arc::new(Session::new(generate_session_id(), outbound_tx));
        self.sessions.register(session.clone());
        debug!(session_id = %session.id(), "line session opened");

        let writer = tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if let Err(e) = sender.send(&payload).await {
                    warn!(error = %e, "write failed, stopping writer");
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                frame = receiver.next_frame() => match frame {
                    Ok(raw) => {
                        let engine = self.engine.clone();
                        let session = session.clone();
                        tokio::spawn(async move {
                            for payload in engine.handle(&session, &raw).await {
                                if session.send_payload(payload).is_err() {
                                    break;
                                }
                            }
                        });
                    }
                    Err(TransportError::FrameTooLarge { size, max }) => {
                        warn!(size, max, "oversized frame rejected");
                        let _ = session.send_response(JsonRpcResponse::error(
                            None,
                            JsonRpcError::invalid_request(format!(
                                "frame of {size} bytes exceeds the {max} byte limit"
                            )),
                        ));
                    }
                    Err(TransportError::Closed) => break Ok(()),
                    Err(TransportError::Cancelled) => break Ok(()),
                    Err(e) => break Err(McpError::Transport(e.to_string())),
                },
            }
        };

        self.sessions.unregister(session.id());
        // Closing the session drops the queue sender; the writer drains what
        // is already queued, under a bounded deadline.
        drop(session);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), writer).await;
        result
    }

    /// Serve the hybrid SSE + HTTP POST endpoints until shutdown.
    pub async fn serve_sse(&self, config: SseServerConfig) -> McpResult<()> {
        let sse = self.sse_server(config);
        sse.serve().await.map_err(|e| McpError::Transport(e.to_string()))
    }

    /// Serve the SSE endpoints on an already-bound listener.
    pub async fn serve_sse_with_listener(
        &self,
        config: SseServerConfig,
        listener: tokio::net::TcpListener,
    ) -> McpResult<()> {
        let sse = self.sse_server(config);
        sse.serve_with_listener(listener)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }

    fn sse_server(&self, config: SseServerConfig) -> SseServer {
        let handler = Arc::new(EngineConnectionHandler {
            engine: self.engine.clone(),
            sessions: self.sessions.clone(),
        });
        let sse = SseServer::new(config, handler);

        let sse_token = sse.shutdown_token();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            sse_token.cancel();
        });
        sse
    }
}

/// Glue between the SSE transport callbacks and the engine.
struct EngineConnectionHandler {
    engine: MessageEngine,
    sessions: Arc<SessionManager>,
}

#[async_trait::async_trait]
impl SseConnectionHandler for EngineConnectionHandler {
    async fn on_open(&self, session_id: &str, outbound: mpsc::Sender<JsonRpcPayload>) {
        let session = Arc::new(Session::new(session_id, outbound));
        self.sessions.register(session);
        debug!(session_id, "sse session opened");
    }

    async fn on_message(&self, session_id: &str, raw: &[u8]) -> Vec<JsonRpcPayload> {
        let Some(session) = self.sessions.get(session_id) else {
            warn!(session_id, "message for unregistered session");
            return Vec::new();
        };

        // The initialize reply must ride in the POST body, and a parse
        // failure must surface synchronously as the 400 body. Everything
        // else is dispatched off the POST so a slow handler holds nothing
        // up; its replies flow out over the event stream.
        let parsed = JsonRpcPayload::parse(raw);
        let answer_inline = match &parsed {
            Ok(JsonRpcPayload::Single(JsonRpcMessage::Request(request))) => {
                request.method == methods::INITIALIZE
            }
            Ok(_) => false,
            Err(_) => true,
        };

        if answer_inline {
            return self.engine.handle(&session, raw).await;
        }

        let engine = self.engine.clone();
        let raw = raw.to_vec();
        tokio::spawn(async move {
            for payload in engine.handle(&session, &raw).await {
                if session.send_payload(payload).is_err() {
                    break;
                }
            }
        });
        Vec::new()
    }

    async fn on_close(&self, session_id: &str) {
        self.sessions.unregister(session_id);
        debug!(session_id, "sse session closed");
    }
}

/// Builder for [`McpServer`].
pub struct McpServerBuilder {
    info: ServerInfo,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    page_size: usize,
    queue_capacity: usize,
    hooks: HookChain,
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self {
            info: ServerInfo::new("duplex-mcp-server", env!("CARGO_PKG_VERSION")),
            capabilities: ServerCapabilities::full(),
            instructions: None,
            page_size: DEFAULT_PAGE_SIZE,
            queue_capacity: 64,
            hooks: HookChain::new(),
        }
    }
}

impl McpServerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.info.version = version.into();
        self
    }

    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn before_message_hook(mut self, hook: Arc<dyn BeforeMessageHook>) -> Self {
        self.hooks.push_before(hook);
        self
    }

    pub fn after_message_hook(mut self, hook: Arc<dyn AfterMessageHook>) -> Self {
        self.hooks.push_after(hook);
        self
    }

    pub fn build(self) -> McpServer {
        let registry = Arc::new(CapabilityRegistry::new(self.page_size));
        let sessions = Arc::new(SessionManager::new());

        // Registry mutations fan out as list-changed notifications to every
        // initialized session that subscribed to them.
        {
            let sessions = sessions.clone();
            registry.set_change_listener(Arc::new(move |kind| {
                let (method, wants): (&str, fn(&duplex_mcp_core::ClientCapabilities) -> bool) =
                    match kind {
                        CapabilityKind::Tools => (
                            methods::NOTIFICATION_TOOLS_LIST_CHANGED,
                            |caps| caps.wants_tool_list_changed(),
                        ),
                        CapabilityKind::Resources => (
                            methods::NOTIFICATION_RESOURCES_LIST_CHANGED,
                            |caps| caps.wants_resource_list_changed(),
                        ),
                        CapabilityKind::Prompts => (
                            methods::NOTIFICATION_PROMPTS_LIST_CHANGED,
                            |caps| caps.wants_prompt_list_changed(),
                        ),
                    };
                sessions.broadcast(method, wants);
            }));
        }

        let engine = MessageEngine::new(
            self.info,
            self.capabilities,
            self.instructions,
            registry.clone(),
            self.hooks,
        );

        McpServer {
            engine,
            sessions,
            registry,
            queue_capacity: self.queue_capacity,
            shutdown: CancellationToken::new(),
        }
    }
}
