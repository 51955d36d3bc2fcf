//! Broker layer
//!
//! The [`Broker`] is the RPC/event framework the dispatcher drives: it
//! routes `"<service>.<action>"` calls to handlers and publishes events to
//! listeners. [`LocalBroker`] is an in-process implementation.

use crate::storage::ConnectionConfig;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub mod context;
pub mod hooks;
pub mod local;

pub use context::{Context, Locals, ParentSpan};
pub use hooks::{CallHook, HookChain, LoggingHook};
pub use local::{EmittedEvent, LocalBroker};

/// Options of an action call
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Metadata handed to the callee's context
    pub meta: Map<String, Value>,
    /// Call timeout; `None` waits as long as the handler runs
    pub timeout: Option<Duration>,
    /// Tracing correlation to restore in the callee's context
    pub parent_span: Option<ParentSpan>,
}

impl CallOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set metadata
    #[must_use]
    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set parent span
    #[must_use]
    pub fn parent_span(mut self, span: ParentSpan) -> Self {
        self.parent_span = Some(span);
        self
    }
}

/// Options of an emitted event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitOptions {
    /// Metadata attached to the event
    pub meta: Map<String, Value>,
    /// Tracing correlation of the event
    pub parent_span: Option<ParentSpan>,
    /// Restrict delivery to listeners of these service groups (empty = all)
    pub groups: Vec<String>,
}

impl EmitOptions {
    /// Minimal options for an event of `queue`: `{ meta: { job: { queue } } }`
    pub fn for_queue(queue: &str) -> Self {
        let mut meta = Map::new();
        meta.insert("job".to_string(), json!({ "queue": queue }));
        Self {
            meta,
            ..Self::default()
        }
    }

    /// Set delivery groups
    #[must_use]
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }
}

/// RPC/event framework
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Call `"<service>.<action>"` and wait for its result
    async fn call(&self, action: &str, params: Value, opts: CallOptions) -> Result<Value>;

    /// Publish an event
    async fn emit(&self, event: &str, payload: Option<Value>, opts: EmitOptions) -> Result<()>;

    /// Connection of the broker's shared cache store, usable as queue backend
    fn cacher_connection(&self) -> Option<ConnectionConfig> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_options_for_queue() {
        let opts = EmitOptions::for_queue("images").with_groups(vec!["images".into()]);
        assert_eq!(Value::Object(opts.meta), json!({"job": {"queue": "images"}}));
        assert_eq!(opts.groups, vec!["images"]);
        assert!(opts.parent_span.is_none());
    }

    #[test]
    fn test_call_options_builder() {
        let opts = CallOptions::new()
            .timeout(Duration::from_secs(1))
            .parent_span(ParentSpan::default());
        assert_eq!(opts.timeout, Some(Duration::from_secs(1)));
        assert!(opts.parent_span.is_some());
        assert!(CallOptions::new().timeout.is_none());
    }
}
