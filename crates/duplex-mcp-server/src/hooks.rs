//! Message interception hooks.
//!
//! Hooks run in registration order around message dispatch. A before-hook
//! may replace the raw frame, extend the context's value chain (how an auth
//! hook attaches the [`crate::context::Principal`]), or short-circuit with
//! an error that the engine converts into the reply shape appropriate to
//! the message kind. After-hooks observe the frame and the reply that was
//! produced.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use duplex_mcp_core::error::McpResult;
use duplex_mcp_core::protocol::JsonRpcMessage;

use crate::context::Extensions;
use crate::session::Session;

/// Outcome of a before-hook: the (possibly replaced) frame and the
/// (possibly extended) value chain.
pub struct HookOutcome {
    pub frame: Value,
    pub extensions: Extensions,
}

/// Runs before a message is dispatched.
#[async_trait]
pub trait BeforeMessageHook: Send + Sync {
    async fn before_message(
        &self,
        session: &Arc<Session>,
        extensions: Extensions,
        frame: Value,
    ) -> McpResult<HookOutcome>;
}

/// Runs after the reply (if any) was produced.
#[async_trait]
pub trait AfterMessageHook: Send + Sync {
    async fn after_message(
        &self,
        session: &Arc<Session>,
        extensions: &Extensions,
        frame: &Value,
        reply: Option<&JsonRpcMessage>,
    );
}

/// Ordered hook chains.
#[derive(Default, Clone)]
pub struct HookChain {
    before: Vec<Arc<dyn BeforeMessageHook>>,
    after: Vec<Arc<dyn AfterMessageHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_before(&mut self, hook: Arc<dyn BeforeMessageHook>) {
        self.before.push(hook);
    }

    pub fn push_after(&mut self, hook: Arc<dyn AfterMessageHook>) {
        self.after.push(hook);
    }

    /// Thread the frame and extensions through every before-hook in order.
    /// The first error short-circuits.
    pub async fn run_before(
        &self,
        session: &Arc<Session>,
        mut extensions: Extensions,
        mut frame: Value,
    ) -> McpResult<HookOutcome> {
        for hook in &self.before {
            let outcome = hook.before_message(session, extensions, frame).await?;
            frame = outcome.frame;
            extensions = outcome.extensions;
        }
        Ok(HookOutcome { frame, extensions })
    }

    pub async fn run_after(
        &self,
        session: &Arc<Session>,
        extensions: &Extensions,
        frame: &Value,
        reply: Option<&JsonRpcMessage>,
    ) {
        for hook in &self.after {
            hook.after_message(session, extensions, frame, reply).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;
    use duplex_mcp_core::error::McpError;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct AttachPrincipal;

    #[async_trait]
    impl BeforeMessageHook for AttachPrincipal {
        async fn before_message(
            &self,
            _session: &Arc<Session>,
            extensions: Extensions,
            frame: Value,
        ) -> McpResult<HookOutcome> {
            Ok(HookOutcome {
                frame,
                extensions: extensions.insert(Principal::new("alice")),
            })
        }
    }

    struct RewriteMethod;

    #[async_trait]
    impl BeforeMessageHook for RewriteMethod {
        async fn before_message(
            &self,
            _session: &Arc<Session>,
            extensions: Extensions,
            mut frame: Value,
        ) -> McpResult<HookOutcome> {
            frame["method"] = json!("ping");
            Ok(HookOutcome { frame, extensions })
        }
    }

    struct Reject;

    #[async_trait]
    impl BeforeMessageHook for Reject {
        async fn before_message(
            &self,
            _session: &Arc<Session>,
            _extensions: Extensions,
            _frame: Value,
        ) -> McpResult<HookOutcome> {
            Err(McpError::Protocol(
                duplex_mcp_core::error::ProtocolError::AuthenticationFailed(
                    "no token".to_string(),
                ),
            ))
        }
    }

    fn test_session() -> Arc<Session> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(Session::new("s", tx))
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let mut chain = HookChain::new();
        chain.push_before(Arc::new(AttachPrincipal));
        chain.push_before(Arc::new(RewriteMethod));

        let outcome = chain
            .run_before(
                &test_session(),
                Extensions::new(),
                json!({"jsonrpc": "2.0", "method": "secret/op", "id": 1}),
            )
            .await
            .unwrap();

        assert_eq!(outcome.frame["method"], json!("ping"));
        assert_eq!(
            outcome.extensions.get::<Principal>().unwrap().subject,
            "alice"
        );
    }

    #[tokio::test]
    async fn test_hook_error_short_circuits() {
        let mut chain = HookChain::new();
        chain.push_before(Arc::new(Reject));
        chain.push_before(Arc::new(RewriteMethod));

        let result = chain
            .run_before(
                &test_session(),
                Extensions::new(),
                json!({"jsonrpc": "2.0", "method": "x", "id": 1}),
            )
            .await;
        assert!(result.is_err());
    }
}
