//! In-memory queue backend
//!
//! Stores jobs in process memory. Suitable for tests, development and
//! single-process deployments that do not need persistence across restarts.

use super::{
    cutoff_before, due_at, EventSubscription, Job, JobCounts, JobOptions, JobState, QueueBackend,
    QueueEvent,
};
use crate::{config, Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// State of one named queue
struct QueueState {
    jobs: HashMap<String, Job>,
    /// (priority, seq, id)
    waiting: BTreeSet<(u32, u64, String)>,
    /// (due timestamp ms, id)
    delayed: BTreeSet<(i64, String)>,
    delayed_due: HashMap<String, i64>,
    active: HashSet<String>,
    paused: bool,
    drained: bool,
    next_id: u64,
    next_seq: u64,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueState {
    fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            jobs: HashMap::new(),
            waiting: BTreeSet::new(),
            delayed: BTreeSet::new(),
            delayed_due: HashMap::new(),
            active: HashSet::new(),
            paused: false,
            drained: true,
            next_id: 0,
            next_seq: 0,
            events,
        }
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn push_waiting(&mut self, job: &Job) {
        let (priority, seq) = job.order_key();
        self.waiting.insert((priority, seq, job.id.clone()));
        self.drained = false;
    }

    fn push_delayed(&mut self, id: &str, due: i64) {
        self.delayed.insert((due, id.to_string()));
        self.delayed_due.insert(id.to_string(), due);
    }

    /// Drop a job from every index
    fn unlink(&mut self, id: &str) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        let (priority, seq) = job.order_key();
        self.waiting.remove(&(priority, seq, id.to_string()));
        if let Some(due) = self.delayed_due.remove(id) {
            self.delayed.remove(&(due, id.to_string()));
        }
        self.active.remove(id);
        Some(job)
    }
}

/// In-memory queue backend
///
/// Wrap in an `Arc` to share one backend between producers and workers.
pub struct MemoryBackend {
    queues: Mutex<HashMap<String, QueueState>>,
    available: AtomicBool,
    capacity: usize,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            capacity: config::get_config().event_capacity,
        }
    }

    /// Simulate losing (or regaining) the storage connection
    ///
    /// While unavailable every operation fails with
    /// [`Error::QueueUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::QueueUnavailable("memory backend is offline".into()))
        }
    }

    async fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> Result<T>) -> Result<T> {
        self.check_available()?;
        let mut queues = self.queues.lock().await;
        let state = queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(self.capacity));
        f(state)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn add(&self, queue: &str, name: &str, data: Value, opts: JobOptions) -> Result<Job> {
        Job::validate_submission(queue, name, &data, &opts)?;
        self.with_queue(queue, |state| {
            if let Some(custom) = &opts.job_id {
                if let Some(existing) = state.jobs.get(custom) {
                    tracing::debug!("Job {} already exists in queue {}", custom, queue);
                    return Ok(existing.clone());
                }
            }

            state.next_seq += 1;
            let id = match &opts.job_id {
                Some(custom) => custom.clone(),
                None => {
                    state.next_id += 1;
                    state.next_id.to_string()
                }
            };

            let job = Job::new(id, queue, name, data, opts, state.next_seq);

            match job.state {
                JobState::Delayed => state.push_delayed(&job.id, job.delayed_until()),
                _ => state.push_waiting(&job),
            }
            state.jobs.insert(job.id.clone(), job.clone());

            tracing::debug!("Job added: {}", job.description());
            Ok(job)
        })
        .await
    }

    async fn get_job(&self, queue: &str, id: &str) -> Result<Option<Job>> {
        self.with_queue(queue, |state| Ok(state.jobs.get(id).cloned())).await
    }

    async fn remove_job(&self, queue: &str, id: &str) -> Result<bool> {
        self.with_queue(queue, |state| {
            if state.active.contains(id) {
                return Err(Error::Validation(format!(
                    "job {} is active and cannot be removed",
                    id
                )));
            }
            match state.unlink(id) {
                Some(_) => {
                    state.emit(QueueEvent::Removed { id: id.to_string() });
                    Ok(true)
                }
                None => Ok(false),
            }
        })
        .await
    }

    async fn update_progress(&self, queue: &str, id: &str, progress: Value) -> Result<()> {
        self.with_queue(queue, |state| {
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
            job.progress = progress.clone();
            state.emit(QueueEvent::Progress {
                id: id.to_string(),
                data: progress,
            });
            Ok(())
        })
        .await
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        self.with_queue(queue, |state| {
            state.paused = true;
            state.emit(QueueEvent::Paused);
            Ok(())
        })
        .await?;
        tracing::info!("Queue '{}' paused", queue);
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        self.with_queue(queue, |state| {
            state.paused = false;
            state.emit(QueueEvent::Resumed);
            Ok(())
        })
        .await?;
        tracing::info!("Queue '{}' resumed", queue);
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool> {
        self.with_queue(queue, |state| Ok(state.paused)).await
    }

    async fn clean(
        &self,
        queue: &str,
        grace: Duration,
        limit: usize,
        target: JobState,
    ) -> Result<Vec<String>> {
        if target == JobState::Active {
            return Err(Error::Validation("active jobs cannot be cleaned".into()));
        }

        self.with_queue(queue, |state| {
            let cutoff = cutoff_before(Utc::now().timestamp_millis(), grace);

            let mut candidates: Vec<(i64, String)> = state
                .jobs
                .values()
                .filter(|job| job.state == target)
                .map(|job| (job.finished_on.unwrap_or(job.timestamp), job.id.clone()))
                .filter(|(at, _)| *at <= cutoff)
                .collect();
            candidates.sort();
            if limit > 0 {
                candidates.truncate(limit);
            }

            let removed: Vec<String> = candidates
                .into_iter()
                .filter_map(|(_, id)| state.unlink(&id).map(|job| job.id))
                .collect();

            if !removed.is_empty() {
                state.emit(QueueEvent::Cleaned {
                    jobs: removed.clone(),
                    state: target,
                });
            }
            Ok(removed)
        })
        .await
    }

    async fn promote_delayed(&self, queue: &str) -> Result<usize> {
        self.with_queue(queue, |state| {
            let now = Utc::now().timestamp_millis();
            let due: Vec<(i64, String)> = state
                .delayed
                .iter()
                .take_while(|(at, _)| *at <= now)
                .cloned()
                .collect();

            for (at, id) in &due {
                state.delayed.remove(&(*at, id.clone()));
                state.delayed_due.remove(id);
                if let Some(job) = state.jobs.get_mut(id) {
                    job.state = JobState::Waiting;
                    let job = job.clone();
                    state.push_waiting(&job);
                }
            }
            Ok(due.len())
        })
        .await
    }

    async fn move_to_active(&self, queue: &str) -> Result<Option<Job>> {
        self.with_queue(queue, |state| {
            if state.paused {
                return Ok(None);
            }

            let next = state.waiting.iter().next().cloned();
            let Some(entry) = next else {
                if !state.drained {
                    state.drained = true;
                    state.emit(QueueEvent::Drained);
                }
                return Ok(None);
            };
            state.waiting.remove(&entry);

            let id = entry.2;
            let job = state
                .jobs
                .get_mut(&id)
                .ok_or_else(|| Error::JobNotFound(id.clone()))?;
            job.state = JobState::Active;
            job.attempts_made += 1;
            job.processed_on = Some(Utc::now().timestamp_millis());
            let job = job.clone();

            state.active.insert(id.clone());
            state.emit(QueueEvent::Active { id });
            Ok(Some(job))
        })
        .await
    }

    async fn move_to_completed(&self, queue: &str, id: &str, return_value: Value) -> Result<()> {
        self.with_queue(queue, |state| {
            if !state.active.remove(id) {
                state.emit(QueueEvent::Error {
                    id: Some(id.to_string()),
                    message: format!("job {} is not active", id),
                });
                return Err(Error::JobNotFound(id.to_string()));
            }
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
            job.state = JobState::Completed;
            job.return_value = Some(return_value);
            job.finished_on = Some(Utc::now().timestamp_millis());

            if job.opts.remove_on_complete {
                state.jobs.remove(id);
            }
            state.emit(QueueEvent::Completed { id: id.to_string() });
            Ok(())
        })
        .await
    }

    async fn move_to_failed(&self, queue: &str, id: &str, reason: &str) -> Result<JobState> {
        self.with_queue(queue, |state| {
            if !state.active.remove(id) {
                state.emit(QueueEvent::Error {
                    id: Some(id.to_string()),
                    message: format!("job {} is not active", id),
                });
                return Err(Error::JobNotFound(id.to_string()));
            }
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
            job.failed_reason = Some(reason.to_string());

            if job.can_retry() {
                let delay = job.retry_delay();
                let job = job.clone();
                if delay.is_zero() {
                    if let Some(stored) = state.jobs.get_mut(id) {
                        stored.state = JobState::Waiting;
                    }
                    state.push_waiting(&job);
                    return Ok(JobState::Waiting);
                }
                if let Some(stored) = state.jobs.get_mut(id) {
                    stored.state = JobState::Delayed;
                }
                let due = due_at(Utc::now().timestamp_millis(), delay);
                state.push_delayed(id, due);
                return Ok(JobState::Delayed);
            }

            job.state = JobState::Failed;
            job.finished_on = Some(Utc::now().timestamp_millis());
            if job.opts.remove_on_fail {
                state.jobs.remove(id);
            }
            state.emit(QueueEvent::Failed {
                id: id.to_string(),
                reason: reason.to_string(),
            });
            Ok(JobState::Failed)
        })
        .await
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts> {
        self.with_queue(queue, |state| {
            let finished = |target: JobState| {
                state.jobs.values().filter(|job| job.state == target).count() as u64
            };
            Ok(JobCounts {
                waiting: state.waiting.len() as u64,
                delayed: state.delayed.len() as u64,
                active: state.active.len() as u64,
                completed: finished(JobState::Completed),
                failed: finished(JobState::Failed),
                paused: state.paused,
            })
        })
        .await
    }

    async fn subscribe(&self, queue: &str) -> Result<EventSubscription> {
        self.with_queue(queue, |state| {
            Ok(EventSubscription::new(queue, state.events.subscribe()))
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Backoff;
    use serde_json::json;

    #[tokio::test]
    async fn test_ids_are_sequential_per_queue() {
        let backend = MemoryBackend::new();
        let a = backend.add("a", "x", json!({}), JobOptions::new()).await.unwrap();
        let b = backend.add("a", "x", json!({}), JobOptions::new()).await.unwrap();
        let c = backend.add("b", "x", json!({}), JobOptions::new()).await.unwrap();
        assert_eq!((a.id.as_str(), b.id.as_str(), c.id.as_str()), ("1", "2", "1"));
    }

    #[tokio::test]
    async fn test_custom_job_id_deduplicates() {
        let backend = MemoryBackend::new();
        let opts = JobOptions::new().job_id("report-1");
        let first = backend.add("q", "report", json!({"n": 1}), opts.clone()).await.unwrap();
        let second = backend.add("q", "report", json!({"n": 2}), opts).await.unwrap();
        assert_eq!(first.id, "report-1");
        assert_eq!(second.data, json!({"n": 1}));
        assert_eq!(backend.counts("q").await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let backend = MemoryBackend::new();
        backend.add("q", "low", json!({}), JobOptions::new().priority(10)).await.unwrap();
        backend.add("q", "high", json!({}), JobOptions::new().priority(1)).await.unwrap();
        backend.add("q", "plain", json!({}), JobOptions::new()).await.unwrap();

        let order: Vec<String> = [
            backend.move_to_active("q").await.unwrap().unwrap().name,
            backend.move_to_active("q").await.unwrap().unwrap().name,
            backend.move_to_active("q").await.unwrap().unwrap().name,
        ]
        .to_vec();
        assert_eq!(order, vec!["plain", "high", "low"]);
    }

    #[tokio::test]
    async fn test_complete_and_events() {
        let backend = MemoryBackend::new();
        let mut events = backend.subscribe("q").await.unwrap();
        let job = backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap();

        let active = backend.move_to_active("q").await.unwrap().unwrap();
        assert_eq!(active.state, JobState::Active);
        assert_eq!(active.attempts_made, 1);
        backend.update_progress("q", &job.id, json!(50)).await.unwrap();
        backend.move_to_completed("q", &job.id, json!({"ok": true})).await.unwrap();
        assert!(backend.move_to_active("q").await.unwrap().is_none());

        assert_eq!(events.recv().await, Some(QueueEvent::Active { id: job.id.clone() }));
        assert_eq!(
            events.recv().await,
            Some(QueueEvent::Progress { id: job.id.clone(), data: json!(50) })
        );
        assert_eq!(events.recv().await, Some(QueueEvent::Completed { id: job.id.clone() }));
        assert_eq!(events.recv().await, Some(QueueEvent::Drained));

        let stored = backend.get_job("q", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.return_value, Some(json!({"ok": true})));
        assert_eq!(stored.progress, json!(50));
    }

    #[tokio::test]
    async fn test_retry_then_fail() {
        let backend = MemoryBackend::new();
        let job = backend
            .add("q", "x", json!({}), JobOptions::new().attempts(2))
            .await
            .unwrap();

        backend.move_to_active("q").await.unwrap();
        let state = backend.move_to_failed("q", &job.id, "first").await.unwrap();
        assert_eq!(state, JobState::Waiting);

        backend.move_to_active("q").await.unwrap();
        let state = backend.move_to_failed("q", &job.id, "second").await.unwrap();
        assert_eq!(state, JobState::Failed);

        let stored = backend.get_job("q", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_reason.as_deref(), Some("second"));
        assert_eq!(stored.attempts_made, 2);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_goes_delayed() {
        let backend = MemoryBackend::new();
        let job = backend
            .add(
                "q",
                "x",
                json!({}),
                JobOptions::new().attempts(2).backoff(Backoff::Fixed { delay: 60_000 }),
            )
            .await
            .unwrap();
        backend.move_to_active("q").await.unwrap();
        assert_eq!(
            backend.move_to_failed("q", &job.id, "boom").await.unwrap(),
            JobState::Delayed
        );
        assert_eq!(backend.promote_delayed("q").await.unwrap(), 0);
        assert_eq!(backend.counts("q").await.unwrap().delayed, 1);
    }

    #[tokio::test]
    async fn test_delayed_promotion() {
        let backend = MemoryBackend::new();
        backend
            .add("q", "x", json!({}), JobOptions::new().delay(Duration::from_millis(1)))
            .await
            .unwrap();
        assert!(backend.move_to_active("q").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(backend.promote_delayed("q").await.unwrap(), 1);
        assert!(backend.move_to_active("q").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pause_blocks_activation() {
        let backend = MemoryBackend::new();
        backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap();
        backend.pause("q").await.unwrap();
        assert!(backend.is_paused("q").await.unwrap());
        assert!(backend.move_to_active("q").await.unwrap().is_none());
        backend.resume("q").await.unwrap();
        assert!(backend.move_to_active("q").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_and_clean() {
        let backend = MemoryBackend::new();
        let mut events = backend.subscribe("q").await.unwrap();
        let a = backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap();
        let b = backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap();

        assert!(backend.remove_job("q", &a.id).await.unwrap());
        assert!(!backend.remove_job("q", &a.id).await.unwrap());
        assert_eq!(events.recv().await, Some(QueueEvent::Removed { id: a.id.clone() }));

        let cleaned = backend
            .clean("q", Duration::ZERO, 0, JobState::Waiting)
            .await
            .unwrap();
        assert_eq!(cleaned, vec![b.id.clone()]);
        assert_eq!(
            events.recv().await,
            Some(QueueEvent::Cleaned { jobs: vec![b.id], state: JobState::Waiting })
        );
        assert!(backend.clean("q", Duration::ZERO, 0, JobState::Active).await.is_err());
    }

    #[tokio::test]
    async fn test_active_job_cannot_be_removed() {
        let backend = MemoryBackend::new();
        let job = backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap();
        backend.move_to_active("q").await.unwrap();
        assert!(backend.remove_job("q", &job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_add_allocates_nothing() {
        let backend = MemoryBackend::new();
        let oversized =
            JobOptions::new().delay(Duration::from_millis(crate::queue::MAX_DELAY_MS + 1));
        assert!(matches!(
            backend.add("q", "x", json!({}), oversized).await,
            Err(Error::Validation(_))
        ));
        assert!(backend.add("q", "", json!({}), JobOptions::new()).await.is_err());

        let job = backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap();
        assert_eq!(job.id, "1");
        assert_eq!(job.seq, 1);
    }

    #[tokio::test]
    async fn test_unbounded_backoff_in_stored_record_saturates() {
        let backend = MemoryBackend::new();
        let job = backend
            .add("q", "x", json!({}), JobOptions::new().attempts(2))
            .await
            .unwrap();
        let other = backend.add("q", "y", json!({}), JobOptions::new()).await.unwrap();
        // Records written by another producer may carry any backoff
        backend
            .with_queue("q", |state| {
                let stored = state.jobs.get_mut(&job.id).unwrap();
                stored.opts.backoff = Some(Backoff::Fixed { delay: i64::MAX as u64 });
                Ok(())
            })
            .await
            .unwrap();

        backend.move_to_active("q").await.unwrap();
        assert_eq!(
            backend.move_to_failed("q", &job.id, "boom").await.unwrap(),
            JobState::Delayed
        );
        assert_eq!(backend.promote_delayed("q").await.unwrap(), 0);
        let next = backend.move_to_active("q").await.unwrap().unwrap();
        assert_eq!(next.id, other.id);
    }

    #[tokio::test]
    async fn test_clean_with_huge_grace_removes_nothing() {
        let backend = MemoryBackend::new();
        backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap();
        let cleaned = backend
            .clean("q", Duration::MAX, 0, JobState::Waiting)
            .await
            .unwrap();
        assert!(cleaned.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        let err = backend.add("q", "x", json!({}), JobOptions::new()).await.unwrap_err();
        assert!(err.is_unavailable());
        backend.set_available(true);
        assert!(backend.add("q", "x", json!({}), JobOptions::new()).await.is_ok());
    }
}
