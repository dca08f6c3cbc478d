//! Everything most applications need, one import away.

pub use duplex_mcp_core::error::{McpError, McpResult, ProtocolError, ResourceError, ToolError};
pub use duplex_mcp_core::protocol::{
    ClientCapabilities, ClientInfo, InitializeRequest, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcNotification, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse,
    ProtocolVersion, RequestId, ServerCapabilities, ServerInfo,
};
pub use duplex_mcp_core::schema::{FieldSpec, InputSchema, StringFormat};
pub use duplex_mcp_core::types::{
    CallToolRequest, CallToolResult, CompleteRequest, CompleteResult, Completion, Content,
    CreateMessageRequest, CreateMessageResult, GetPromptRequest, GetPromptResult, LogLevel, Page,
    Prompt, PromptMessage, ReadResourceRequest, ReadResourceResult, Resource, ResourceContents,
    Role, SamplingMessage, Tool,
};
pub use duplex_mcp_core::uri_template::{TemplateBindings, UriTemplate};

pub use duplex_mcp_transport::sse::{
    SseClientConfig, SseClientTransport, SseServerConfig,
};
pub use duplex_mcp_transport::{LineTransport, Transport, TransportError};

pub use duplex_mcp_server::registry::{
    PromptFn, ResourceFn, TemplateFn, ToolFn,
};
pub use duplex_mcp_server::{
    BeforeMessageHook, CapabilityRegistry, CompletionHandler, McpServer, Principal,
    PromptHandler, RequestContext, ResourceHandler, TemplateHandler, ToolHandler,
};

pub use duplex_mcp_client::{
    ClientConfig, ClientToolHandler, McpClient, SamplingHandler,
};
