//! Job queue layer
//!
//! The queue owns job storage, delayed-job promotion, retries and lifecycle
//! events. Everything above it talks to a [`QueueBackend`]; two backends are
//! provided: [`MemoryBackend`] for in-process use and tests, and
//! [`RedisBackend`] for durable, multi-process deployments.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub mod events;
pub mod job;
pub mod memory;
pub mod redis;
pub mod scheduler;
pub mod worker;

pub use events::{EventSubscription, QueueEvent};
pub use job::{cutoff_before, due_at, Backoff, Job, JobOptions, JobState, MAX_DELAY_MS, MAX_PRIORITY};
pub use memory::MemoryBackend;
pub use redis::RedisBackend;
pub use scheduler::Scheduler;
pub use worker::{Processor, Worker, WorkerOptions};

/// Per-state job counts of a queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Jobs waiting for a worker
    pub waiting: u64,
    /// Jobs scheduled for later
    pub delayed: u64,
    /// Jobs being processed
    pub active: u64,
    /// Jobs completed and still retained
    pub completed: u64,
    /// Jobs failed and still retained
    pub failed: u64,
    /// Whether the queue is paused
    pub paused: bool,
}

/// Queue backend - storage and state transitions for named queues
///
/// Implementations publish a [`QueueEvent`] for every transition they
/// perform, so subscribers observe the same lifecycle regardless of which
/// process triggered it.
#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    /// Short backend name for logging
    fn kind(&self) -> &'static str;

    /// Add a job; returns the stored record with its assigned id
    async fn add(&self, queue: &str, name: &str, data: Value, opts: JobOptions) -> Result<Job>;

    /// Fetch a job by id; `None` if it does not exist
    async fn get_job(&self, queue: &str, id: &str) -> Result<Option<Job>>;

    /// Delete a job that is not active; returns false if it did not exist
    async fn remove_job(&self, queue: &str, id: &str) -> Result<bool>;

    /// Record progress for a job
    async fn update_progress(&self, queue: &str, id: &str, progress: Value) -> Result<()>;

    /// Stop all workers of the queue from picking up jobs
    async fn pause(&self, queue: &str) -> Result<()>;

    /// Allow workers to pick up jobs again
    async fn resume(&self, queue: &str) -> Result<()>;

    /// Check whether the queue is paused
    async fn is_paused(&self, queue: &str) -> Result<bool>;

    /// Remove jobs in `state` older than `grace`, at most `limit` (0 = all)
    async fn clean(
        &self,
        queue: &str,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> Result<Vec<String>>;

    /// Move due delayed jobs to waiting; returns how many were moved
    async fn promote_delayed(&self, queue: &str) -> Result<usize>;

    /// Take the next waiting job and mark it active
    async fn move_to_active(&self, queue: &str) -> Result<Option<Job>>;

    /// Mark an active job completed with its return value
    async fn move_to_completed(&self, queue: &str, id: &str, return_value: Value) -> Result<()>;

    /// Record a failed attempt; returns the state the job ended up in
    ///
    /// Jobs with attempts left go back to waiting (or delayed when a backoff
    /// applies); otherwise the job becomes failed.
    async fn move_to_failed(&self, queue: &str, id: &str, reason: &str) -> Result<JobState>;

    /// Count jobs per state
    async fn counts(&self, queue: &str) -> Result<JobCounts>;

    /// Subscribe to the queue's lifecycle events
    async fn subscribe(&self, queue: &str) -> Result<EventSubscription>;

    /// Release connections held by the backend
    async fn close(&self) -> Result<()>;
}
