//! Call hooks
//!
//! Hooks run around every action call of the service they are attached to.

use super::Context;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Call hook trait
#[async_trait]
pub trait CallHook: Send + Sync {
    /// Called before the action handler; may modify the context
    async fn before(&self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Called after the action handler
    async fn after(&self, _ctx: &Context, _result: &Result<Value>) -> Result<()> {
        Ok(())
    }
}

/// Hook chain
///
/// Executes hooks in the order they were added.
#[derive(Default, Clone)]
pub struct HookChain {
    hooks: Vec<Arc<dyn CallHook>>,
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("count", &self.hooks.len())
            .finish()
    }
}

impl HookChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hook to the chain
    pub fn push(&mut self, hook: Arc<dyn CallHook>) {
        self.hooks.push(hook);
    }

    /// Execute before hooks
    pub async fn before(&self, ctx: &mut Context) -> Result<()> {
        for hook in &self.hooks {
            hook.before(ctx).await?;
        }
        Ok(())
    }

    /// Execute after hooks
    pub async fn after(&self, ctx: &Context, result: &Result<Value>) -> Result<()> {
        for hook in &self.hooks {
            hook.after(ctx, result).await?;
        }
        Ok(())
    }

    /// Number of hooks
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Check if chain is empty
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Logging hook - logs action calls
#[derive(Debug, Clone, Default)]
pub struct LoggingHook {
    log_details: bool,
}

impl LoggingHook {
    /// Create a new logging hook
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable detailed logging
    #[must_use]
    pub fn with_details(mut self) -> Self {
        self.log_details = true;
        self
    }
}

#[async_trait]
impl CallHook for LoggingHook {
    async fn before(&self, ctx: &mut Context) -> Result<()> {
        let action = ctx.action.as_deref().unwrap_or("?");
        if self.log_details {
            tracing::info!(
                "Calling action: action={}, request={}, parent={:?}, job={:?}",
                action,
                ctx.request_id,
                ctx.parent_id,
                ctx.job_meta()
            );
        } else {
            tracing::info!("Calling action: {}", action);
        }
        Ok(())
    }

    async fn after(&self, ctx: &Context, result: &Result<Value>) -> Result<()> {
        let action = ctx.action.as_deref().unwrap_or("?");
        match result {
            Ok(_) => tracing::info!("Action completed: {}", action),
            Err(e) => tracing::error!("Action failed: {} - error: {}", action, e),
        }
        Ok(())
    }
}
