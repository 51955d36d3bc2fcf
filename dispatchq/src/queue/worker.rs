//! Worker implementation
//!
//! A worker polls one queue, moves jobs to active and hands them to a
//! [`Processor`]. Each job runs on its own task so a panicking handler
//! fails the job instead of taking the fetch loop down with it.

use super::{Job, JobState, QueueBackend};
use crate::{config, Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;

/// Job processor
///
/// The returned value is stored as the job's return value; an error fails
/// the attempt with the error's message as reason.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Process a job
    async fn process(&self, job: Job) -> Result<Value>;
}

/// Worker options
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Number of jobs processed in parallel (default: 1)
    pub concurrency: usize,
    /// Delay between polls of an empty or failing queue
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_millis(config::get_config().poll_interval_ms),
        }
    }
}

impl WorkerOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set concurrency
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set poll interval
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// State shared between the worker handle and its fetch loops
struct WorkerState {
    queue: String,
    backend: Arc<dyn QueueBackend>,
    processor: Arc<dyn Processor>,
    poll_interval: Duration,
    shutdown: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
}

/// Worker - job processing unit bound to one queue
pub struct Worker {
    state: Arc<WorkerState>,
    loops: Mutex<JoinSet<()>>,
}

impl Worker {
    /// Start processing `queue`
    pub fn start(
        queue: impl Into<String>,
        backend: Arc<dyn QueueBackend>,
        processor: Arc<dyn Processor>,
        options: WorkerOptions,
    ) -> Self {
        let state = Arc::new(WorkerState {
            queue: queue.into(),
            backend,
            processor,
            poll_interval: options.poll_interval,
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            wake: Notify::new(),
        });

        let mut loops = JoinSet::new();
        for slot in 0..options.concurrency.max(1) {
            let state = state.clone();
            loops.spawn(async move { state.run(slot).await });
        }

        tracing::info!(
            "Worker started for queue {} with concurrency {}",
            state.queue,
            options.concurrency.max(1)
        );

        Self {
            state,
            loops: Mutex::new(loops),
        }
    }

    /// Queue this worker processes
    pub fn queue(&self) -> &str {
        &self.state.queue
    }

    /// Stop fetching new jobs in this process only
    ///
    /// Jobs already running finish normally.
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
        tracing::info!("Worker for queue {} paused", self.state.queue);
    }

    /// Resume fetching jobs
    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
        self.state.wake.notify_waiters();
        tracing::info!("Worker for queue {} resumed", self.state.queue);
    }

    /// Check if the worker is paused locally
    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    /// Check if the worker was closed
    pub fn is_closed(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }

    /// Stop the fetch loops and wait for running jobs to settle
    pub async fn close(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.state.wake.notify_waiters();

        let mut loops = self.loops.lock().await;
        while let Some(res) = loops.join_next().await {
            if let Err(e) = res {
                tracing::error!("Worker loop for queue {} ended abnormally: {}", self.state.queue, e);
            }
        }
        tracing::info!("Worker for queue {} closed", self.state.queue);
    }
}

impl WorkerState {
    async fn run(&self, slot: usize) {
        tracing::debug!("Worker loop {} for queue {} running", slot, self.queue);

        while !self.shutdown.load(Ordering::SeqCst) {
            if self.paused.load(Ordering::SeqCst) {
                self.idle(self.poll_interval).await;
                continue;
            }

            match self.backend.move_to_active(&self.queue).await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => self.idle(self.poll_interval).await,
                Err(e) if e.is_unavailable() => {
                    tracing::warn!("Queue {} unavailable: {}", self.queue, e);
                    self.idle(e.retry_after().unwrap_or(self.poll_interval)).await;
                }
                Err(e) => {
                    tracing::error!("Failed to fetch job from queue {}: {}", self.queue, e);
                    self.idle(self.poll_interval).await;
                }
            }
        }

        tracing::debug!("Worker loop {} for queue {} stopped", slot, self.queue);
    }

    /// Sleep until the interval elapses or the worker is woken up
    async fn idle(&self, interval: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.wake.notified() => {}
        }
    }

    async fn process_job(&self, job: Job) {
        tracing::debug!("Processing {}", job.description());
        let id = job.id.clone();

        let processor = self.processor.clone();
        let outcome = match tokio::spawn(async move { processor.process(job).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Error::handler("job handler panicked")),
            Err(e) => Err(Error::handler(format!("job handler cancelled: {}", e))),
        };

        let settled = match outcome {
            Ok(value) => self
                .backend
                .move_to_completed(&self.queue, &id, value)
                .await
                .map(|_| JobState::Completed),
            Err(e) => {
                let reason = e.to_string();
                tracing::debug!("Job {} in queue {} failed: {}", id, self.queue, reason);
                self.backend.move_to_failed(&self.queue, &id, &reason).await
            }
        };

        match settled {
            Ok(state) => tracing::debug!("Job {} in queue {} is now {}", id, self.queue, state),
            Err(e) => tracing::error!("Failed to settle job {} in queue {}: {}", id, self.queue, e),
        }
    }
}
