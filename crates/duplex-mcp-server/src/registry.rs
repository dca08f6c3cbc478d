//! Capability registry: tools, static resources, URI-template resources,
//! and prompts, with their handlers.
//!
//! The tables are read-mostly behind a reader-writer lock; registration
//! takes the write lock, and list-changed notifications fire after it is
//! released. Names are unique per kind, and a new template is rejected when
//! an already-registered one could match the same URI.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use duplex_mcp_core::error::{McpError, McpResult, ResourceError, ToolError};
use duplex_mcp_core::schema::{InputSchema, bind_arguments};
use duplex_mcp_core::types::{
    CallToolResult, Completion, CompletionArgument, CompletionReference, GetPromptResult, Page,
    Prompt, ReadResourceResult, Resource, ResourceTemplateDef, Tool,
};
use duplex_mcp_core::uri_template::{TemplateBindings, UriTemplate};
use duplex_mcp_core::utils::{DEFAULT_PAGE_SIZE, paginate};

use crate::context::RequestContext;

/// Handles `tools/call` for one registered tool. Arguments arrive already
/// validated and bound against the declared schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: RequestContext,
        arguments: Map<String, Value>,
    ) -> McpResult<CallToolResult>;
}

/// Handles `resources/read` for one static resource.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, ctx: RequestContext, uri: &str) -> McpResult<ReadResourceResult>;
}

/// Handles `resources/read` for URIs matched by a template; receives the
/// extracted parameter bindings.
#[async_trait]
pub trait TemplateHandler: Send + Sync {
    async fn read(
        &self,
        ctx: RequestContext,
        uri: &str,
        params: TemplateBindings,
    ) -> McpResult<ReadResourceResult>;
}

/// Handles `prompts/get` for one prompt. Arguments arrive validated against
/// the prompt's declared argument schema.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn get(
        &self,
        ctx: RequestContext,
        arguments: Map<String, Value>,
    ) -> McpResult<GetPromptResult>;
}

/// Handles `completion/complete` for a prompt or template argument.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn complete(
        &self,
        ctx: RequestContext,
        argument: CompletionArgument,
    ) -> McpResult<Completion>;
}

/// Adapter so a plain async closure can serve as a [`ToolHandler`].
pub struct ToolFn<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for ToolFn<F>
where
    F: Fn(RequestContext, Map<String, Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = McpResult<CallToolResult>> + Send,
{
    async fn call(
        &self,
        ctx: RequestContext,
        arguments: Map<String, Value>,
    ) -> McpResult<CallToolResult> {
        (self.0)(ctx, arguments).await
    }
}

/// Adapter so a plain async closure can serve as a [`ResourceHandler`].
pub struct ResourceFn<F>(pub F);

#[async_trait]
impl<F, Fut> ResourceHandler for ResourceFn<F>
where
    F: Fn(RequestContext, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = McpResult<ReadResourceResult>> + Send,
{
    async fn read(&self, ctx: RequestContext, uri: &str) -> McpResult<ReadResourceResult> {
        (self.0)(ctx, uri.to_string()).await
    }
}

/// Adapter so a plain async closure can serve as a [`TemplateHandler`].
pub struct TemplateFn<F>(pub F);

#[async_trait]
impl<F, Fut> TemplateHandler for TemplateFn<F>
where
    F: Fn(RequestContext, String, TemplateBindings) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = McpResult<ReadResourceResult>> + Send,
{
    async fn read(
        &self,
        ctx: RequestContext,
        uri: &str,
        params: TemplateBindings,
    ) -> McpResult<ReadResourceResult> {
        (self.0)(ctx, uri.to_string(), params).await
    }
}

/// Adapter so a plain async closure can serve as a [`PromptHandler`].
pub struct PromptFn<F>(pub F);

#[async_trait]
impl<F, Fut> PromptHandler for PromptFn<F>
where
    F: Fn(RequestContext, Map<String, Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = McpResult<GetPromptResult>> + Send,
{
    async fn get(
        &self,
        ctx: RequestContext,
        arguments: Map<String, Value>,
    ) -> McpResult<GetPromptResult> {
        (self.0)(ctx, arguments).await
    }
}

/// Which capability table changed, for list-changed broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Tools,
    Resources,
    Prompts,
}

type ChangeListener = Arc<dyn Fn(CapabilityKind) + Send + Sync>;

struct RegisteredTool {
    def: Tool,
    schema: InputSchema,
    handler: Arc<dyn ToolHandler>,
}

struct RegisteredResource {
    def: Resource,
    handler: Arc<dyn ResourceHandler>,
}

struct RegisteredTemplate {
    def: ResourceTemplateDef,
    template: UriTemplate,
    handler: Arc<dyn TemplateHandler>,
    completion: Option<Arc<dyn CompletionHandler>>,
}

struct RegisteredPrompt {
    def: Prompt,
    schema: InputSchema,
    handler: Arc<dyn PromptHandler>,
    completion: Option<Arc<dyn CompletionHandler>>,
}

/// The resolution of `find_resource`: which handler serves the URI, and for
/// templates, the extracted bindings.
pub enum ResolvedResource {
    Static(Arc<dyn ResourceHandler>),
    Template(Arc<dyn TemplateHandler>, TemplateBindings),
}

impl std::fmt::Debug for ResolvedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedResource::Static(_) => f.write_str("ResolvedResource::Static(..)"),
            ResolvedResource::Template(_, bindings) => {
                f.debug_tuple("ResolvedResource::Template")
                    .field(&"..")
                    .field(bindings)
                    .finish()
            }
        }
    }
}

/// Registry of everything the server exposes.
pub struct CapabilityRegistry {
    tools: RwLock<Vec<RegisteredTool>>,
    resources: RwLock<Vec<RegisteredResource>>,
    templates: RwLock<Vec<RegisteredTemplate>>,
    prompts: RwLock<Vec<RegisteredPrompt>>,
    page_size: usize,
    change_listener: std::sync::RwLock<Option<ChangeListener>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl CapabilityRegistry {
    pub fn new(page_size: usize) -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            templates: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
            page_size,
            change_listener: std::sync::RwLock::new(None),
        }
    }

    /// Called after every table mutation, outside the table lock.
    pub fn set_change_listener(&self, listener: ChangeListener) {
        *self.change_listener.write().expect("listener lock") = Some(listener);
    }

    fn notify_changed(&self, kind: CapabilityKind) {
        let listener = self.change_listener.read().expect("listener lock").clone();
        if let Some(listener) = listener {
            listener(kind);
        }
    }

    // ---- registration --------------------------------------------------

    pub async fn register_tool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: InputSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> McpResult<()> {
        let name = name.into();
        {
            let mut tools = self.tools.write().await;
            if tools.iter().any(|t| t.def.name == name) {
                return Err(McpError::invalid_request(format!(
                    "tool already registered: {name}"
                )));
            }
            let def = Tool {
                name: name.clone(),
                description: description.into(),
                input_schema: schema.to_json(),
                output_schema: None,
            };
            tools.push(RegisteredTool {
                def,
                schema,
                handler,
            });
        }
        debug!(tool = %name, "tool registered");
        self.notify_changed(CapabilityKind::Tools);
        Ok(())
    }

    pub async fn register_resource(
        &self,
        uri: impl Into<String>,
        description: impl Into<String>,
        mime_type: Option<String>,
        handler: Arc<dyn ResourceHandler>,
    ) -> McpResult<()> {
        let uri = uri.into();
        {
            let mut resources = self.resources.write().await;
            if resources.iter().any(|r| r.def.uri == uri) {
                return Err(McpError::invalid_request(format!(
                    "resource already registered: {uri}"
                )));
            }
            resources.push(RegisteredResource {
                def: Resource {
                    uri: uri.clone(),
                    description: Some(description.into()),
                    mime_type,
                },
                handler,
            });
        }
        debug!(uri = %uri, "resource registered");
        self.notify_changed(CapabilityKind::Resources);
        Ok(())
    }

    /// Register a URI-template resource. Rejected when an existing template
    /// could match a URI this one also matches.
    pub async fn register_resource_template(
        &self,
        pattern: &str,
        description: impl Into<String>,
        handler: Arc<dyn TemplateHandler>,
    ) -> McpResult<()> {
        let template = UriTemplate::parse(pattern)
            .map_err(|e| McpError::Resource(ResourceError::InvalidUri(e.to_string())))?;
        {
            let mut templates = self.templates.write().await;
            if let Some(existing) = templates.iter().find(|t| t.template.overlaps(&template)) {
                return Err(McpError::invalid_request(format!(
                    "template {pattern} is ambiguous with registered template {}",
                    existing.def.uri_template
                )));
            }
            templates.push(RegisteredTemplate {
                def: ResourceTemplateDef {
                    uri_template: pattern.to_string(),
                    description: Some(description.into()),
                    mime_type: None,
                },
                template,
                handler,
                completion: None,
            });
        }
        debug!(pattern = %pattern, "resource template registered");
        self.notify_changed(CapabilityKind::Resources);
        Ok(())
    }

    pub async fn register_prompt(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: InputSchema,
        handler: Arc<dyn PromptHandler>,
    ) -> McpResult<()> {
        let name = name.into();
        {
            let mut prompts = self.prompts.write().await;
            if prompts.iter().any(|p| p.def.name == name) {
                return Err(McpError::invalid_request(format!(
                    "prompt already registered: {name}"
                )));
            }
            let arguments = schema
                .fields()
                .iter()
                .map(|f| duplex_mcp_core::types::PromptArgument {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    required: f.required.then_some(true),
                })
                .collect();
            prompts.push(RegisteredPrompt {
                def: Prompt {
                    name: name.clone(),
                    description: Some(description.into()),
                    arguments,
                },
                schema,
                handler,
                completion: None,
            });
        }
        debug!(prompt = %name, "prompt registered");
        self.notify_changed(CapabilityKind::Prompts);
        Ok(())
    }

    /// Attach an autocompletion handler to a registered prompt.
    pub async fn register_prompt_completion(
        &self,
        name: &str,
        completion: Arc<dyn CompletionHandler>,
    ) -> McpResult<()> {
        let mut prompts = self.prompts.write().await;
        let prompt = prompts
            .iter_mut()
            .find(|p| p.def.name == name)
            .ok_or_else(|| McpError::invalid_request(format!("unknown prompt: {name}")))?;
        prompt.completion = Some(completion);
        Ok(())
    }

    /// Attach an autocompletion handler to a registered template.
    pub async fn register_template_completion(
        &self,
        pattern: &str,
        completion: Arc<dyn CompletionHandler>,
    ) -> McpResult<()> {
        let mut templates = self.templates.write().await;
        let template = templates
            .iter_mut()
            .find(|t| t.def.uri_template == pattern)
            .ok_or_else(|| McpError::invalid_request(format!("unknown template: {pattern}")))?;
        template.completion = Some(completion);
        Ok(())
    }

    pub async fn remove_tool(&self, name: &str) -> bool {
        let removed = {
            let mut tools = self.tools.write().await;
            let before = tools.len();
            tools.retain(|t| t.def.name != name);
            tools.len() != before
        };
        if removed {
            self.notify_changed(CapabilityKind::Tools);
        }
        removed
    }

    // ---- listing -------------------------------------------------------

    pub async fn list_tools(&self, cursor: Option<&str>) -> McpResult<Page<Tool>> {
        let snapshot: Vec<Tool> = self.tools.read().await.iter().map(|t| t.def.clone()).collect();
        paginate(&snapshot, cursor, self.page_size)
            .map_err(|e| McpError::invalid_params(e.to_string()))
    }

    pub async fn list_resources(&self, cursor: Option<&str>) -> McpResult<Page<Resource>> {
        let snapshot: Vec<Resource> = self
            .resources
            .read()
            .await
            .iter()
            .map(|r| r.def.clone())
            .collect();
        paginate(&snapshot, cursor, self.page_size)
            .map_err(|e| McpError::invalid_params(e.to_string()))
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> McpResult<Page<ResourceTemplateDef>> {
        let snapshot: Vec<ResourceTemplateDef> = self
            .templates
            .read()
            .await
            .iter()
            .map(|t| t.def.clone())
            .collect();
        paginate(&snapshot, cursor, self.page_size)
            .map_err(|e| McpError::invalid_params(e.to_string()))
    }

    pub async fn list_prompts(&self, cursor: Option<&str>) -> McpResult<Page<Prompt>> {
        let snapshot: Vec<Prompt> = self
            .prompts
            .read()
            .await
            .iter()
            .map(|p| p.def.clone())
            .collect();
        paginate(&snapshot, cursor, self.page_size)
            .map_err(|e| McpError::invalid_params(e.to_string()))
    }

    // ---- resolution and invocation ------------------------------------

    /// Exact static match first, then templates in registration order.
    pub async fn find_resource(&self, uri: &str) -> McpResult<ResolvedResource> {
        if let Some(resource) = self
            .resources
            .read()
            .await
            .iter()
            .find(|r| r.def.uri == uri)
        {
            return Ok(ResolvedResource::Static(resource.handler.clone()));
        }

        for registered in self.templates.read().await.iter() {
            if let Some(bindings) = registered.template.matches(uri) {
                return Ok(ResolvedResource::Template(
                    registered.handler.clone(),
                    bindings,
                ));
            }
        }

        Err(McpError::Resource(ResourceError::NotFound(uri.to_string())))
    }

    /// Resolve and read a resource.
    pub async fn read_resource(
        &self,
        ctx: RequestContext,
        uri: &str,
    ) -> McpResult<ReadResourceResult> {
        match self.find_resource(uri).await? {
            ResolvedResource::Static(handler) => handler.read(ctx, uri).await,
            ResolvedResource::Template(handler, bindings) => {
                handler.read(ctx, uri, bindings).await
            }
        }
    }

    /// Locate the tool, bind and validate the arguments, call the handler,
    /// and normalize tool-level failures into the `isError` result shape.
    pub async fn invoke_tool(
        &self,
        ctx: RequestContext,
        name: &str,
        arguments: Option<&Map<String, Value>>,
    ) -> McpResult<CallToolResult> {
        let (schema, handler) = {
            let tools = self.tools.read().await;
            let tool = tools
                .iter()
                .find(|t| t.def.name == name)
                .ok_or_else(|| McpError::Tool(ToolError::NotFound(name.to_string())))?;
            (tool.schema.clone(), tool.handler.clone())
        };

        let bound = bind_arguments(&schema, arguments)
            .map_err(|e| McpError::Schema(e.into()))?;

        match handler.call(ctx, bound).await {
            Ok(result) => Ok(result),
            // A tool-level failure is a successful RPC reply with isError.
            Err(McpError::Tool(ToolError::Execution(message))) => {
                Ok(CallToolResult::error(message))
            }
            Err(other) => Err(other),
        }
    }

    /// Validate and dispatch `prompts/get`.
    pub async fn get_prompt(
        &self,
        ctx: RequestContext,
        name: &str,
        arguments: Option<&Map<String, Value>>,
    ) -> McpResult<GetPromptResult> {
        let (schema, handler) = {
            let prompts = self.prompts.read().await;
            let prompt = prompts
                .iter()
                .find(|p| p.def.name == name)
                .ok_or_else(|| McpError::invalid_params(format!("unknown prompt: {name}")))?;
            (prompt.schema.clone(), prompt.handler.clone())
        };

        let bound = bind_arguments(&schema, arguments)
            .map_err(|e| McpError::Schema(e.into()))?;
        handler.get(ctx, bound).await
    }

    /// Route `completion/complete` to the referenced prompt's or template's
    /// completion handler. A reference without a handler completes empty.
    pub async fn complete(
        &self,
        ctx: RequestContext,
        reference: &CompletionReference,
        argument: CompletionArgument,
    ) -> McpResult<Completion> {
        let handler = match reference {
            CompletionReference::Prompt { name } => {
                let prompts = self.prompts.read().await;
                let prompt = prompts
                    .iter()
                    .find(|p| p.def.name == *name)
                    .ok_or_else(|| {
                        McpError::invalid_params(format!("unknown prompt: {name}"))
                    })?;
                prompt.completion.clone()
            }
            CompletionReference::Resource { uri } => {
                let templates = self.templates.read().await;
                templates
                    .iter()
                    .find(|t| t.def.uri_template == *uri || t.template.matches(uri).is_some())
                    .and_then(|t| t.completion.clone())
            }
        };

        match handler {
            Some(handler) => handler.complete(ctx, argument).await,
            None => Ok(Completion::empty()),
        }
    }
}
