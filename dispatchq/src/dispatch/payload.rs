//! Job payload envelope
//!
//! What a queued call stores in `Job.data`: the call parameters, the caller's
//! metadata and its tracing correlation.

use crate::broker::{Context, ParentSpan};
use crate::queue::Job;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Payload of a queued call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Call parameters
    #[serde(default)]
    pub params: Value,
    /// Caller metadata
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// Caller's tracing correlation
    #[serde(default)]
    pub parent_span: Option<ParentSpan>,
}

impl JobPayload {
    /// Capture a call made from `ctx`
    pub fn from_context(ctx: &Context, params: Value) -> Self {
        Self {
            params,
            meta: ctx.meta.clone(),
            parent_span: Some(ctx.parent_span()),
        }
    }

    /// Decode the payload stored in a job
    pub fn from_job(job: &Job) -> Result<Self> {
        Ok(serde_json::from_value(job.data.clone())?)
    }

    /// Encode for storage
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Set `meta.job = { id, queue }`
    #[must_use]
    pub fn with_job_meta(mut self, id: &str, queue: &str) -> Self {
        self.meta
            .insert("job".to_string(), json!({ "id": id, "queue": queue }));
        self
    }
}
