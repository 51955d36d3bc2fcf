//! Redis queue backend
//!
//! Job records are stored as MessagePack under `<prefix>:<queue>:job:<id>`;
//! queue states are sorted sets and sets next to it (see
//! [`crate::storage::Keys`]). Lifecycle events are published as JSON on the
//! queue's event channel, so every process subscribed to a queue sees the
//! same events no matter which process caused them.

use super::{
    cutoff_before, due_at, EventSubscription, Job, JobCounts, JobOptions, JobState, QueueBackend,
    QueueEvent,
};
use crate::storage::{ConnectionConfig, Keys, RedisClient, Subscriber};
use crate::{config, Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use fred::prelude::{RedisKey, RedisValue};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::task::JoinHandle;

/// Insertion sequences kept in a waiting score
///
/// Scores are doubles, so priority and sequence must fit 53 bits together;
/// `MAX_PRIORITY` takes 22 of them. Past 2^31 submissions on one queue the
/// sequence wraps and FIFO order inside a priority class restarts.
const SEQ_BITS: u32 = 31;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

/// Score of a waiting job: priority class first, insertion order second
fn wait_score(job: &Job) -> i64 {
    let (priority, seq) = job.order_key();
    ((u64::from(priority) << SEQ_BITS) | (seq & SEQ_MASK)) as i64
}

/// Per-queue event fan-out fed by the shared subscriber connection
type Channels = Arc<std::sync::Mutex<HashMap<String, broadcast::Sender<QueueEvent>>>>;

struct EventListener {
    subscriber: Subscriber,
    forwarder: JoinHandle<()>,
}

/// Redis-backed queue backend
pub struct RedisBackend {
    redis: RedisClient,
    keys: Keys,
    capacity: usize,
    channels: Channels,
    listener: OnceCell<EventListener>,
    subscribe_lock: Mutex<()>,
}

impl RedisBackend {
    /// Connect to Redis using the global key prefix
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let redis = RedisClient::new(config).await?;
        Ok(Self::with_client(redis, Keys::default()))
    }

    /// Build a backend on an existing client and key layout
    pub fn with_client(redis: RedisClient, keys: Keys) -> Self {
        Self {
            redis,
            keys,
            capacity: config::get_config().event_capacity,
            channels: Arc::new(std::sync::Mutex::new(HashMap::new())),
            listener: OnceCell::new(),
            subscribe_lock: Mutex::new(()),
        }
    }

    /// Underlying Redis client
    pub fn client(&self) -> &RedisClient {
        &self.redis
    }

    fn key(&self, key: String) -> RedisKey {
        key.into()
    }

    async fn load(&self, queue: &str, id: &str) -> Result<Option<Job>> {
        let data = match self.redis.get(self.key(self.keys.job(queue, id))).await? {
            Some(RedisValue::Null) | None => return Ok(None),
            Some(data) => data,
        };
        let bytes = data
            .as_bytes()
            .ok_or_else(|| Error::Serialization("job record is not bytes".into()))?;
        let job = rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Some(job))
    }

    fn encode(job: &Job) -> Result<RedisValue> {
        let data = rmp_serde::to_vec_named(job).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(RedisValue::Bytes(data.into()))
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.redis
            .set(self.key(self.keys.job(&job.queue, &job.id)), Self::encode(job)?)
            .await
    }

    async fn load_existing(&self, queue: &str, id: &str) -> Result<Job> {
        self.load(queue, id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    async fn push_waiting(&self, job: &Job) -> Result<()> {
        self.redis
            .zadd(self.key(self.keys.wait(&job.queue)), job.id.as_str().into(), wait_score(job))
            .await?;
        self.redis
            .set(self.key(self.keys.pending(&job.queue)), "1".into())
            .await
    }

    async fn publish(&self, queue: &str, event: QueueEvent) {
        let message = match serde_json::to_string(&event) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to encode {} event: {}", event.kind(), e);
                return;
            }
        };
        if let Err(e) = self.redis.publish(&self.keys.events(queue), message).await {
            tracing::warn!("Failed to publish {} event for queue {}: {}", event.kind(), queue, e);
        }
    }

    /// Drop a job from every state index and delete its record
    async fn unlink(&self, queue: &str, id: &str) -> Result<()> {
        for key in [
            self.keys.wait(queue),
            self.keys.delayed(queue),
            self.keys.completed(queue),
            self.keys.failed(queue),
        ] {
            self.redis.zrem(self.key(key), id.into()).await?;
        }
        self.redis.del(vec![self.key(self.keys.job(queue, id))]).await?;
        Ok(())
    }

    async fn listener(&self) -> Result<&EventListener> {
        self.listener
            .get_or_try_init(|| async {
                let subscriber = self.redis.subscriber().await?;
                let mut messages = subscriber.messages();
                let channels = self.channels.clone();
                let keys = self.keys.clone();

                let forwarder = tokio::spawn(async move {
                    loop {
                        let message = match messages.recv().await {
                            Ok(message) => message,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!("Event listener lagged, {} messages skipped", n);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        let channel = message.channel.to_string();
                        let Some(queue) = keys.queue_of_events(&channel) else {
                            continue;
                        };
                        let Some(payload) = message.value.as_string() else {
                            continue;
                        };
                        let event: QueueEvent = match serde_json::from_str(&payload) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::warn!("Malformed event on {}: {}", channel, e);
                                continue;
                            }
                        };

                        let sender = channels
                            .lock()
                            .ok()
                            .and_then(|channels| channels.get(queue).cloned());
                        if let Some(sender) = sender {
                            let _ = sender.send(event);
                        }
                    }
                    tracing::debug!("Event listener stopped");
                });

                Ok::<_, Error>(EventListener {
                    subscriber,
                    forwarder,
                })
            })
            .await
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn add(&self, queue: &str, name: &str, data: Value, opts: JobOptions) -> Result<Job> {
        Job::validate_submission(queue, name, &data, &opts)?;
        let custom_id = opts.job_id.clone();
        let id = match &custom_id {
            Some(id) => id.clone(),
            None => self
                .redis
                .incr(self.key(self.keys.id_counter(queue)))
                .await?
                .to_string(),
        };
        // Reuse the id counter key as insertion sequence for custom ids too
        let seq = match &custom_id {
            Some(_) => self.redis.incr(self.key(self.keys.id_counter(queue))).await? as u64,
            None => id.parse::<u64>().unwrap_or_default(),
        };

        let job = Job::new(id, queue, name, data, opts, seq);

        let record = self.key(self.keys.job(queue, &job.id));
        if custom_id.is_some() {
            if !self.redis.set_nx(record, Self::encode(&job)?).await? {
                tracing::debug!("Job {} already exists in queue {}", job.id, queue);
                return self.load_existing(queue, &job.id).await;
            }
        } else {
            self.redis.set(record, Self::encode(&job)?).await?;
        }

        match job.state {
            JobState::Delayed => {
                self.redis
                    .zadd(self.key(self.keys.delayed(queue)), job.id.as_str().into(), job.delayed_until())
                    .await?
            }
            _ => self.push_waiting(&job).await?,
        }

        tracing::debug!("Job added: {}", job.description());
        Ok(job)
    }

    async fn get_job(&self, queue: &str, id: &str) -> Result<Option<Job>> {
        self.load(queue, id).await
    }

    async fn remove_job(&self, queue: &str, id: &str) -> Result<bool> {
        if self
            .redis
            .sismember(self.key(self.keys.active(queue)), id.into())
            .await?
        {
            return Err(Error::Validation(format!(
                "job {} is active and cannot be removed",
                id
            )));
        }
        if self.load(queue, id).await?.is_none() {
            return Ok(false);
        }

        self.unlink(queue, id).await?;
        self.publish(queue, QueueEvent::Removed { id: id.to_string() }).await;
        Ok(true)
    }

    async fn update_progress(&self, queue: &str, id: &str, progress: Value) -> Result<()> {
        let mut job = self.load_existing(queue, id).await?;
        job.progress = progress.clone();
        self.save(&job).await?;
        self.publish(
            queue,
            QueueEvent::Progress {
                id: id.to_string(),
                data: progress,
            },
        )
        .await;
        Ok(())
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        self.redis
            .set(self.key(self.keys.paused(queue)), "1".into())
            .await?;
        self.publish(queue, QueueEvent::Paused).await;
        tracing::info!("Queue '{}' paused", queue);
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        self.redis.del(vec![self.key(self.keys.paused(queue))]).await?;
        self.publish(queue, QueueEvent::Resumed).await;
        tracing::info!("Queue '{}' resumed", queue);
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool> {
        self.redis.exists(self.key(self.keys.paused(queue))).await
    }

    async fn clean(
        &self,
        queue: &str,
        grace: Duration,
        limit: usize,
        target: JobState,
    ) -> Result<Vec<String>> {
        let cutoff = cutoff_before(Utc::now().timestamp_millis(), grace);

        let mut ids = match target {
            JobState::Completed | JobState::Failed => {
                let key = match target {
                    JobState::Completed => self.keys.completed(queue),
                    _ => self.keys.failed(queue),
                };
                self.redis.zrangebyscore(self.key(key), 0, cutoff).await?
            }
            JobState::Waiting | JobState::Delayed => {
                let key = match target {
                    JobState::Waiting => self.keys.wait(queue),
                    _ => self.keys.delayed(queue),
                };
                let mut old = Vec::new();
                for id in self.redis.zrange_all(self.key(key)).await? {
                    if let Some(job) = self.load(queue, &id).await? {
                        if job.timestamp <= cutoff {
                            old.push(id);
                        }
                    }
                }
                old
            }
            JobState::Active => {
                return Err(Error::Validation("active jobs cannot be cleaned".into()));
            }
        };
        if limit > 0 {
            ids.truncate(limit);
        }

        for id in &ids {
            self.unlink(queue, id).await?;
        }
        if !ids.is_empty() {
            self.publish(
                queue,
                QueueEvent::Cleaned {
                    jobs: ids.clone(),
                    state: target,
                },
            )
            .await;
        }
        Ok(ids)
    }

    async fn promote_delayed(&self, queue: &str) -> Result<usize> {
        let delayed_key = self.keys.delayed(queue);
        let now = Utc::now().timestamp_millis();
        let due = self
            .redis
            .zrangebyscore(self.key(delayed_key.clone()), 0, now)
            .await?;

        let mut promoted = 0;
        for id in due {
            // Another process may have promoted it first
            if !self
                .redis
                .zrem(self.key(delayed_key.clone()), id.as_str().into())
                .await?
            {
                continue;
            }
            let Some(mut job) = self.load(queue, &id).await? else {
                continue;
            };
            job.state = JobState::Waiting;
            self.save(&job).await?;
            self.push_waiting(&job).await?;
            promoted += 1;
        }
        Ok(promoted)
    }

    async fn move_to_active(&self, queue: &str) -> Result<Option<Job>> {
        if self.is_paused(queue).await? {
            return Ok(None);
        }

        let Some(id) = self.redis.zpopmin(self.key(self.keys.wait(queue))).await? else {
            if self.redis.del(vec![self.key(self.keys.pending(queue))]).await? > 0 {
                self.publish(queue, QueueEvent::Drained).await;
            }
            return Ok(None);
        };

        let Some(mut job) = self.load(queue, &id).await? else {
            tracing::warn!("Waiting job {} in queue {} has no record", id, queue);
            self.publish(
                queue,
                QueueEvent::Error {
                    id: Some(id),
                    message: "job record missing".to_string(),
                },
            )
            .await;
            return Ok(None);
        };
        job.state = JobState::Active;
        job.attempts_made += 1;
        job.processed_on = Some(Utc::now().timestamp_millis());

        self.redis
            .sadd(self.key(self.keys.active(queue)), id.as_str().into())
            .await?;
        self.save(&job).await?;
        self.publish(queue, QueueEvent::Active { id }).await;
        Ok(Some(job))
    }

    async fn move_to_completed(&self, queue: &str, id: &str, return_value: Value) -> Result<()> {
        if !self
            .redis
            .srem(self.key(self.keys.active(queue)), id.into())
            .await?
        {
            self.publish(
                queue,
                QueueEvent::Error {
                    id: Some(id.to_string()),
                    message: format!("job {} is not active", id),
                },
            )
            .await;
            return Err(Error::JobNotFound(id.to_string()));
        }
        let mut job = self.load_existing(queue, id).await?;
        let now = Utc::now().timestamp_millis();
        job.state = JobState::Completed;
        job.return_value = Some(return_value);
        job.finished_on = Some(now);

        if job.opts.remove_on_complete {
            self.redis.del(vec![self.key(self.keys.job(queue, id))]).await?;
        } else {
            self.save(&job).await?;
            self.redis
                .zadd(self.key(self.keys.completed(queue)), id.into(), now)
                .await?;
        }
        self.publish(queue, QueueEvent::Completed { id: id.to_string() }).await;
        Ok(())
    }

    async fn move_to_failed(&self, queue: &str, id: &str, reason: &str) -> Result<JobState> {
        if !self
            .redis
            .srem(self.key(self.keys.active(queue)), id.into())
            .await?
        {
            self.publish(
                queue,
                QueueEvent::Error {
                    id: Some(id.to_string()),
                    message: format!("job {} is not active", id),
                },
            )
            .await;
            return Err(Error::JobNotFound(id.to_string()));
        }
        let mut job = self.load_existing(queue, id).await?;
        job.failed_reason = Some(reason.to_string());

        if job.can_retry() {
            let delay = job.retry_delay();
            if delay.is_zero() {
                job.state = JobState::Waiting;
                self.save(&job).await?;
                self.push_waiting(&job).await?;
                return Ok(JobState::Waiting);
            }
            job.state = JobState::Delayed;
            self.save(&job).await?;
            let due = due_at(Utc::now().timestamp_millis(), delay);
            self.redis
                .zadd(self.key(self.keys.delayed(queue)), id.into(), due)
                .await?;
            return Ok(JobState::Delayed);
        }

        let now = Utc::now().timestamp_millis();
        job.state = JobState::Failed;
        job.finished_on = Some(now);
        if job.opts.remove_on_fail {
            self.redis.del(vec![self.key(self.keys.job(queue, id))]).await?;
        } else {
            self.save(&job).await?;
            self.redis
                .zadd(self.key(self.keys.failed(queue)), id.into(), now)
                .await?;
        }
        self.publish(
            queue,
            QueueEvent::Failed {
                id: id.to_string(),
                reason: reason.to_string(),
            },
        )
        .await;
        Ok(JobState::Failed)
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts> {
        Ok(JobCounts {
            waiting: self.redis.zcard(self.key(self.keys.wait(queue))).await?,
            delayed: self.redis.zcard(self.key(self.keys.delayed(queue))).await?,
            active: self.redis.scard(self.key(self.keys.active(queue))).await?,
            completed: self.redis.zcard(self.key(self.keys.completed(queue))).await?,
            failed: self.redis.zcard(self.key(self.keys.failed(queue))).await?,
            paused: self.is_paused(queue).await?,
        })
    }

    async fn subscribe(&self, queue: &str) -> Result<EventSubscription> {
        let listener = self.listener().await?;
        let _guard = self.subscribe_lock.lock().await;

        let existing = self
            .channels
            .lock()
            .map_err(|_| Error::Unknown("event channel registry poisoned".into()))?
            .get(queue)
            .map(|sender| sender.subscribe());
        if let Some(rx) = existing {
            return Ok(EventSubscription::new(queue, rx));
        }

        let (tx, rx) = broadcast::channel(self.capacity.max(1));
        listener.subscriber.subscribe(&self.keys.events(queue)).await?;
        self.channels
            .lock()
            .map_err(|_| Error::Unknown("event channel registry poisoned".into()))?
            .insert(queue.to_string(), tx);

        tracing::debug!("Subscribed to events of queue {}", queue);
        Ok(EventSubscription::new(queue, rx))
    }

    async fn close(&self) -> Result<()> {
        if let Some(listener) = self.listener.get() {
            listener.forwarder.abort();
            if let Err(e) = listener.subscriber.quit().await {
                tracing::warn!("Failed to close event subscriber: {}", e);
            }
        }
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
        self.redis.quit().await
    }
}
