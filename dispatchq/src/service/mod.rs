//! Service definitions
//!
//! A service is a named set of actions plus the hooks that run around them.
//! Actions flagged queued can additionally be invoked through the service's
//! job queue by a [`crate::dispatch::JobDispatcher`].

use crate::broker::{CallHook, Context, HookChain};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Action handler trait
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Handle a call
    async fn handle(&self, ctx: Context) -> Result<Value>;
}

/// Adapter turning an async closure into an [`ActionHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn handle(&self, ctx: Context) -> Result<Value> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as an action handler
///
/// ```rust
/// use dispatchq::service::{handler_fn, ActionDef};
/// use serde_json::json;
///
/// let ping = ActionDef::new("ping", handler_fn(|_ctx| async { Ok(json!("pong")) }));
/// assert!(!ping.is_queued());
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnHandler(f)
}

/// Action definition
#[derive(Clone)]
pub struct ActionDef {
    name: String,
    queued: bool,
    handler: Arc<dyn ActionHandler>,
}

impl std::fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("queued", &self.queued)
            .finish()
    }
}

impl ActionDef {
    /// Define a plain action
    pub fn new(name: impl Into<String>, handler: impl ActionHandler) -> Self {
        Self {
            name: name.into(),
            queued: false,
            handler: Arc::new(handler),
        }
    }

    /// Define a queue-backed action
    ///
    /// The action stays callable synchronously; the flag makes its service
    /// run a worker for its queue.
    pub fn queued(name: impl Into<String>, handler: impl ActionHandler) -> Self {
        Self {
            queued: true,
            ..Self::new(name, handler)
        }
    }

    /// Action name, without the service prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the action is queue-backed
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Handler of the action
    pub fn handler(&self) -> Arc<dyn ActionHandler> {
        self.handler.clone()
    }
}

/// Service schema
#[derive(Debug, Clone)]
pub struct ServiceSchema {
    name: String,
    actions: Vec<ActionDef>,
    hooks: HookChain,
}

impl ServiceSchema {
    /// Create an empty service
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            hooks: HookChain::new(),
        }
    }

    /// Add an action
    #[must_use]
    pub fn action(mut self, action: ActionDef) -> Self {
        self.actions.retain(|a| a.name != action.name);
        self.actions.push(action);
        self
    }

    /// Add a hook run before/after every action of the service
    #[must_use]
    pub fn hook(mut self, hook: impl CallHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an action by name
    pub fn find(&self, action: &str) -> Option<&ActionDef> {
        self.actions.iter().find(|a| a.name == action)
    }

    /// Names of the queue-backed actions
    pub fn queued_actions(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|a| a.queued)
            .map(|a| a.name.clone())
            .collect()
    }

    /// Hooks of the service
    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LoggingHook;
    use serde_json::json;

    fn echo() -> impl ActionHandler {
        handler_fn(|ctx: Context| async move { Ok(ctx.params) })
    }

    #[test]
    fn test_queued_actions() {
        let schema = ServiceSchema::new("images")
            .action(ActionDef::queued("resize", echo()))
            .action(ActionDef::new("info", echo()))
            .action(ActionDef::queued("thumbnail", echo()))
            .hook(LoggingHook::new());

        assert_eq!(schema.name(), "images");
        assert_eq!(schema.queued_actions(), vec!["resize", "thumbnail"]);
        assert!(schema.find("info").is_some());
        assert!(schema.find("missing").is_none());
        assert_eq!(schema.hooks().len(), 1);
    }

    #[test]
    fn test_redefining_action_replaces_it() {
        let schema = ServiceSchema::new("images")
            .action(ActionDef::queued("resize", echo()))
            .action(ActionDef::new("resize", echo()));
        assert!(schema.queued_actions().is_empty());
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let action = ActionDef::new("echo", echo());
        let mut ctx = Context::new();
        ctx.params = json!({"a": 1});
        assert_eq!(action.handler().handle(ctx).await.unwrap(), json!({"a": 1}));
    }
}
