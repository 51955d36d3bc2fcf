//! Job reference handed to action handlers
//!
//! When an action runs because its job was picked from a queue, the handler
//! finds a [`JobRef`] in `ctx.locals.job`: a snapshot of the job plus the
//! means to report progress on it.

use super::JobPayload;
use crate::queue::{Job, QueueBackend};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;

/// Job snapshot with access to its queue
#[derive(Clone)]
pub struct JobRef {
    job: Job,
    backend: Arc<dyn QueueBackend>,
}

impl std::fmt::Debug for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRef")
            .field("job", &self.job.description())
            .finish()
    }
}

impl JobRef {
    /// Create a reference
    pub fn new(job: Job, backend: Arc<dyn QueueBackend>) -> Self {
        Self { job, backend }
    }

    /// Snapshot of the job
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Job ID
    pub fn id(&self) -> &str {
        &self.job.id
    }

    /// Job name
    pub fn name(&self) -> &str {
        &self.job.name
    }

    /// Queue name
    pub fn queue(&self) -> &str {
        &self.job.queue
    }

    /// Decoded payload envelope
    pub fn payload(&self) -> Result<JobPayload> {
        JobPayload::from_job(&self.job)
    }

    /// Report progress
    ///
    /// Any JSON value is accepted; numbers are conventionally a percentage.
    pub async fn update_progress(&mut self, progress: impl Into<Value>) -> Result<()> {
        let progress = progress.into();
        self.backend
            .update_progress(&self.job.queue, &self.job.id, progress.clone())
            .await?;
        self.job.progress = progress;
        Ok(())
    }

    /// Reload the snapshot; returns false if the job no longer exists
    pub async fn refresh(&mut self) -> Result<bool> {
        match self.backend.get_job(&self.job.queue, &self.job.id).await? {
            Some(job) => {
                self.job = job;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete the job; fails while it is active
    pub async fn remove(&self) -> Result<bool> {
        self.backend.remove_job(&self.job.queue, &self.job.id).await
    }
}
