//! Delayed-job scheduler
//!
//! Periodically moves due delayed jobs (including retries waiting out a
//! backoff) back to waiting.

use super::QueueBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Scheduler - promotes delayed jobs of one queue
pub struct Scheduler {
    queue: String,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the scheduler loop
    pub fn start(queue: impl Into<String>, backend: Arc<dyn QueueBackend>, interval: Duration) -> Self {
        let queue = queue.into();
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());

        let handle = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let wake = wake.clone();
            tokio::spawn(async move {
                tracing::debug!("Scheduler started for queue {}", queue);
                let mut ticker = tokio::time::interval(interval);

                while !shutdown.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = wake.notified() => continue,
                    }

                    match backend.promote_delayed(&queue).await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!("{} delayed jobs promoted in queue {}", n, queue),
                        Err(e) if e.is_unavailable() => {
                            tracing::warn!("Delayed check for queue {} skipped: {}", queue, e);
                        }
                        Err(e) => tracing::error!("Delayed check error for queue {}: {}", queue, e),
                    }
                }

                tracing::debug!("Scheduler stopped for queue {}", queue);
            })
        };

        Self {
            queue,
            shutdown,
            wake,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue this scheduler serves
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Stop the loop and wait for it to exit
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler for queue {} ended abnormally: {}", self.queue, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobOptions, JobState, MemoryBackend};
    use serde_json::json;

    #[tokio::test]
    async fn test_scheduler_promotes_due_jobs() {
        let backend = Arc::new(MemoryBackend::new());
        let job = backend
            .add("q", "later", json!({}), JobOptions::new().delay(Duration::from_millis(10)))
            .await
            .unwrap();

        let scheduler = Scheduler::start("q", backend.clone(), Duration::from_millis(5));
        let mut state = JobState::Delayed;
        for _ in 0..100 {
            state = backend.get_job("q", &job.id).await.unwrap().unwrap().state;
            if state == JobState::Waiting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(state, JobState::Waiting);

        scheduler.close().await;
        scheduler.close().await;
    }
}
