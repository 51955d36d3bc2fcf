//! Replays queued jobs as local action calls

use super::JobPayload;
use crate::broker::{Broker, CallOptions};
use crate::queue::{Job, Processor};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Processor of a service's own queue
///
/// Calls `"<service>.<job.name>"` with the stored params, the caller's meta
/// extended with `meta.job` and the caller's parent span. The call has no
/// timeout.
pub struct ActionProcessor {
    service: String,
    broker: Arc<dyn Broker>,
}

impl ActionProcessor {
    /// Create a processor for `service`
    pub fn new(service: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
        Self {
            service: service.into(),
            broker,
        }
    }
}

#[async_trait]
impl Processor for ActionProcessor {
    async fn process(&self, job: Job) -> Result<Value> {
        let payload = JobPayload::from_job(&job)?.with_job_meta(&job.id, &self.service);
        let action = format!("{}.{}", self.service, job.name);
        tracing::debug!("Replaying job {} as {}", job.id, action);

        let opts = CallOptions {
            meta: payload.meta,
            timeout: None,
            parent_span: payload.parent_span,
        };
        self.broker.call(&action, payload.params, opts).await
    }
}
