//! Request context
//!
//! The per-call context an action handler receives: identity of the request,
//! tracing correlation, caller metadata and handler-local values.

use crate::dispatch::JobRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Tracing correlation carried across an asynchronous boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSpan {
    /// ID of the parent span (the caller's parent id)
    pub id: Option<String>,
    /// Trace ID (the caller's request id)
    #[serde(rename = "traceID")]
    pub trace_id: Option<String>,
    /// Whether the trace is sampled
    #[serde(default)]
    pub sampled: bool,
}

/// Values attached to a context by hooks for the handler's use
#[derive(Debug, Clone, Default)]
pub struct Locals {
    /// Job that triggered this call, set for calls replayed from a queue
    pub job: Option<JobRef>,
}

/// Request context
#[derive(Debug, Clone)]
pub struct Context {
    /// Context ID
    pub id: String,
    /// Request ID shared by every call of one request chain
    pub request_id: String,
    /// ID of the calling context, if any
    pub parent_id: Option<String>,
    /// Whether tracing is enabled for this request
    pub tracing: bool,
    /// Fully-qualified action name being called
    pub action: Option<String>,
    /// Call parameters
    pub params: Value,
    /// Caller metadata
    pub meta: Map<String, Value>,
    /// Handler-local values
    pub locals: Locals,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a root context with fresh ids
    pub fn new() -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            request_id: id.clone(),
            id,
            parent_id: None,
            tracing: false,
            action: None,
            params: Value::Null,
            meta: Map::new(),
            locals: Locals::default(),
        }
    }

    /// Create the context of a call, restoring correlation from `parent_span`
    pub fn for_call(
        action: impl Into<String>,
        params: Value,
        meta: Map<String, Value>,
        parent_span: Option<&ParentSpan>,
    ) -> Self {
        let mut ctx = Self::new();
        ctx.action = Some(action.into());
        ctx.params = params;
        ctx.meta = meta;

        if let Some(span) = parent_span {
            ctx.parent_id = span.id.clone();
            if let Some(trace_id) = &span.trace_id {
                ctx.request_id = trace_id.clone();
            }
            ctx.tracing = span.sampled;
        }
        ctx
    }

    /// Set metadata
    #[must_use]
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Set parent id
    #[must_use]
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Enable or disable tracing
    #[must_use]
    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// Correlation to hand to work continued elsewhere
    pub fn parent_span(&self) -> ParentSpan {
        ParentSpan {
            id: self.parent_id.clone(),
            trace_id: Some(self.request_id.clone()),
            sampled: self.tracing,
        }
    }

    /// `{ queue, id }` of the job this call was replayed from, if any
    ///
    /// Numeric ids are accepted and returned in their decimal form.
    pub fn job_meta(&self) -> Option<(String, String)> {
        let job = self.meta.get("job")?.as_object()?;
        let queue = job.get("queue")?.as_str()?;
        let id = match job.get("id")? {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        Some((queue.to_string(), id))
    }
}
