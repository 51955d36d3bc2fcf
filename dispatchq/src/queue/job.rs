//! Job type definitions
//!
//! Provides the Job record stored by queue backends, its lifecycle state and
//! the options a producer may attach on submission.

use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Highest accepted priority value (lower value means higher priority)
pub const MAX_PRIORITY: u32 = 2_097_152;

/// Longest accepted delay or backoff base, in milliseconds (one year)
pub const MAX_DELAY_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Timestamp `after` past `from`, saturating instead of overflowing
pub fn due_at(from: i64, after: Duration) -> i64 {
    from.saturating_add(i64::try_from(after.as_millis()).unwrap_or(i64::MAX))
}

/// Timestamp `before` ahead of `from`, saturating instead of overflowing
pub fn cutoff_before(from: i64, before: Duration) -> i64 {
    from.saturating_sub(i64::try_from(before.as_millis()).unwrap_or(i64::MAX))
}

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be picked up by a worker
    Waiting,
    /// Scheduled for later execution (delay or retry backoff)
    Delayed,
    /// Currently being processed
    Active,
    /// Processed successfully
    Completed,
    /// Failed after exhausting its attempts
    Failed,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Waiting
    }
}

impl JobState {
    /// Check if the job reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Delayed => write!(f, "delayed"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" | "wait" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(Error::Validation(format!("unknown job state: {}", other))),
        }
    }
}

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed {
        /// Delay in milliseconds
        delay: u64,
    },
    /// `delay * 2^(attempt - 1)` before each retry
    Exponential {
        /// Base delay in milliseconds
        delay: u64,
    },
}

impl Backoff {
    /// Delay before the next attempt, given how many attempts were already made
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match self {
            Backoff::Fixed { delay } => Duration::from_millis(*delay),
            Backoff::Exponential { delay } => {
                let exp = attempts_made.saturating_sub(1).min(32);
                Duration::from_millis(delay.saturating_mul(1u64 << exp))
            }
        }
    }
}

/// Job options
///
/// Passed through from the producer to the queue backend without
/// interpretation by the dispatch layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Priority (1 is highest, `None` or 0 means no priority)
    pub priority: Option<u32>,
    /// Delay before the job becomes waiting, in milliseconds
    pub delay: Option<u64>,
    /// Total number of attempts (default 1, no retry)
    pub attempts: Option<u32>,
    /// Backoff between attempts
    pub backoff: Option<Backoff>,
    /// Custom job id; adding an id that already exists returns the existing job
    pub job_id: Option<String>,
    /// Delete the record once completed
    #[serde(default)]
    pub remove_on_complete: bool,
    /// Delete the record once failed
    #[serde(default)]
    pub remove_on_fail: bool,
}

impl JobOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set priority
    #[must_use]
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set delay
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set total attempts
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set backoff strategy
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set custom job id
    #[must_use]
    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Remove the job once completed
    #[must_use]
    pub fn remove_on_complete(mut self) -> Self {
        self.remove_on_complete = true;
        self
    }

    /// Remove the job once failed
    #[must_use]
    pub fn remove_on_fail(mut self) -> Self {
        self.remove_on_fail = true;
        self
    }

    /// Validate options
    pub fn validate(&self) -> Result<()> {
        if let Some(priority) = self.priority {
            if priority > MAX_PRIORITY {
                return Err(Error::Validation(format!(
                    "priority must be between 0 and {}, got {}",
                    MAX_PRIORITY, priority
                )));
            }
        }

        if self.attempts == Some(0) {
            return Err(Error::Validation("attempts must be greater than 0".into()));
        }

        if let Some(delay) = self.delay {
            if delay > MAX_DELAY_MS {
                return Err(Error::Validation(format!(
                    "delay must be at most {}ms, got {}ms",
                    MAX_DELAY_MS, delay
                )));
            }
        }

        if let Some(Backoff::Fixed { delay } | Backoff::Exponential { delay }) = self.backoff {
            if delay > MAX_DELAY_MS {
                return Err(Error::Validation(format!(
                    "backoff delay must be at most {}ms, got {}ms",
                    MAX_DELAY_MS, delay
                )));
            }
        }

        if let Some(id) = &self.job_id {
            if id.is_empty() || id.contains(':') {
                return Err(Error::Validation(format!("invalid custom job id: {:?}", id)));
            }
            if id.parse::<u64>().is_ok() {
                return Err(Error::Validation(format!(
                    "custom job id cannot be an integer: {}",
                    id
                )));
            }
        }

        Ok(())
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.attempts.unwrap_or(1).max(1)
    }

    /// Priority used for ordering (0 when unset)
    pub fn effective_priority(&self) -> u32 {
        self.priority.unwrap_or(0)
    }
}

/// Job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job ID, unique within its queue
    pub id: String,
    /// Job name (routes to the action of the same name)
    pub name: String,
    /// Queue name
    pub queue: String,
    /// Job data
    pub data: Value,
    /// Options the job was added with
    pub opts: JobOptions,
    /// Current state
    pub state: JobState,
    /// Progress reported by the handler
    pub progress: Value,
    /// Value returned by the handler on success
    pub return_value: Option<Value>,
    /// Error message of the last failed attempt
    pub failed_reason: Option<String>,
    /// Number of attempts started so far
    pub attempts_made: u32,
    /// Creation time (Unix timestamp, milliseconds)
    pub timestamp: i64,
    /// Start of the last attempt (Unix timestamp, milliseconds)
    pub processed_on: Option<i64>,
    /// Completion or final failure time (Unix timestamp, milliseconds)
    pub finished_on: Option<i64>,
    /// Insertion sequence, used for FIFO ordering inside a priority class
    pub seq: u64,
}

impl Job {
    /// Create a new job record
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        name: impl Into<String>,
        data: Value,
        opts: JobOptions,
        seq: u64,
    ) -> Self {
        let state = if opts.delay.unwrap_or(0) > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        Self {
            id: id.into(),
            name: name.into(),
            queue: queue.into(),
            data,
            opts,
            state,
            progress: Value::from(0),
            return_value: None,
            failed_reason: None,
            attempts_made: 0,
            timestamp: Utc::now().timestamp_millis(),
            processed_on: None,
            finished_on: None,
            seq,
        }
    }

    /// Validate name and payload size
    pub fn validate(&self) -> Result<()> {
        Self::validate_submission(&self.queue, &self.name, &self.data, &self.opts)
    }

    /// Validate a submission before any id or storage is allocated for it
    pub fn validate_submission(
        queue: &str,
        name: &str,
        data: &Value,
        opts: &JobOptions,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Validation("job name cannot be empty".into()));
        }

        if queue.is_empty() {
            return Err(Error::Validation("queue cannot be empty".into()));
        }

        let size = serde_json::to_vec(data)?.len();
        let max_payload_size = crate::config::get_max_payload_size();
        if size > max_payload_size {
            return Err(Error::Validation(format!(
                "job data exceeds {}KB limit (got {}B)",
                max_payload_size / 1024,
                size
            )));
        }

        opts.validate()
    }

    /// Time at which a delayed job becomes waiting (Unix timestamp, milliseconds)
    pub fn delayed_until(&self) -> i64 {
        due_at(self.timestamp, Duration::from_millis(self.opts.delay.unwrap_or(0)))
    }

    /// Check if another attempt is allowed after a failure
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.opts.max_attempts()
    }

    /// Delay before the next attempt
    pub fn retry_delay(&self) -> Duration {
        self.opts
            .backoff
            .map(|b| b.delay_for(self.attempts_made))
            .unwrap_or(Duration::ZERO)
    }

    /// Sort key: priority class first, then insertion order
    pub fn order_key(&self) -> (u32, u64) {
        (self.opts.effective_priority(), self.seq)
    }

    /// Get job description
    pub fn description(&self) -> String {
        format!(
            "Job[name={}, queue={}, id={}, state={}]",
            self.name, self.queue, self.id, self.state
        )
    }
}
