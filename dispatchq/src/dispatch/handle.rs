//! Queue handle
//!
//! A named queue as seen by one dispatcher. Opening a handle starts the
//! delayed-job scheduler of that queue; closing it stops the scheduler and
//! makes the handle reject further operations.

use crate::queue::{Job, JobCounts, JobOptions, JobState, QueueBackend, Scheduler};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handle to a named queue
pub struct QueueHandle {
    name: String,
    backend: Arc<dyn QueueBackend>,
    scheduler: Scheduler,
    closed: AtomicBool,
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.name)
            .field("backend", &self.backend.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl QueueHandle {
    /// Open a handle and start its scheduler
    pub fn open(name: impl Into<String>, backend: Arc<dyn QueueBackend>, scheduler_interval: Duration) -> Self {
        let name = name.into();
        let scheduler = Scheduler::start(name.clone(), backend.clone(), scheduler_interval);
        tracing::debug!("Queue handle '{}' opened on {} backend", name, backend.kind());
        Self {
            name,
            backend,
            scheduler,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::QueueClosed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Add a job
    pub async fn add(&self, job_name: &str, data: Value, opts: JobOptions) -> Result<Job> {
        self.ensure_open()?;
        self.backend.add(&self.name, job_name, data, opts).await
    }

    /// Fetch a job; `None` if it does not exist
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.ensure_open()?;
        self.backend.get_job(&self.name, id).await
    }

    /// Remove a job that is not active
    pub async fn remove_job(&self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        self.backend.remove_job(&self.name, id).await
    }

    /// Pause the queue for every worker
    pub async fn pause(&self) -> Result<()> {
        self.ensure_open()?;
        self.backend.pause(&self.name).await
    }

    /// Resume the queue for every worker
    pub async fn resume(&self) -> Result<()> {
        self.ensure_open()?;
        self.backend.resume(&self.name).await
    }

    /// Check if the queue is paused
    pub async fn is_paused(&self) -> Result<bool> {
        self.ensure_open()?;
        self.backend.is_paused(&self.name).await
    }

    /// Remove jobs in `state` older than `grace`
    pub async fn clean(&self, grace: Duration, limit: usize, state: JobState) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.backend.clean(&self.name, grace, limit, state).await
    }

    /// Count jobs per state
    pub async fn counts(&self) -> Result<JobCounts> {
        self.ensure_open()?;
        self.backend.counts(&self.name).await
    }

    /// Check if the handle was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the scheduler and reject further operations
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.close().await;
        tracing::debug!("Queue handle '{}' closed", self.name);
    }
}
