//! Queue lifecycle events
//!
//! Every state transition observed by a queue backend is published as a
//! [`QueueEvent`]. Backends deliver them through an [`EventSubscription`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use super::JobState;

/// Lifecycle event emitted by a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum QueueEvent {
    /// A job was picked up by a worker
    Active {
        /// Job ID
        id: String,
    },
    /// A running job reported progress
    Progress {
        /// Job ID
        id: String,
        /// Reported progress value
        data: Value,
    },
    /// A job finished successfully
    Completed {
        /// Job ID
        id: String,
    },
    /// A job failed its last attempt
    Failed {
        /// Job ID
        id: String,
        /// Failure reason
        reason: String,
    },
    /// A job was explicitly deleted
    Removed {
        /// Job ID
        id: String,
    },
    /// Jobs were removed in bulk by a clean operation
    Cleaned {
        /// IDs of the removed jobs
        jobs: Vec<String>,
        /// State the jobs were cleaned from
        #[serde(rename = "type")]
        state: JobState,
    },
    /// The queue was paused
    Paused,
    /// The queue was resumed
    Resumed,
    /// The queue has no more waiting jobs
    Drained,
    /// A queue-level fault occurred
    Error {
        /// Job ID, if the fault concerns a specific job
        id: Option<String>,
        /// Error message
        message: String,
    },
}

impl QueueEvent {
    /// Event type name as used in emitted event names
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Active { .. } => "active",
            QueueEvent::Progress { .. } => "progress",
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Removed { .. } => "removed",
            QueueEvent::Cleaned { .. } => "cleaned",
            QueueEvent::Paused => "paused",
            QueueEvent::Resumed => "resumed",
            QueueEvent::Drained => "drained",
            QueueEvent::Error { .. } => "error",
        }
    }

    /// Job ID carried by the event, if any
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::Active { id }
            | QueueEvent::Progress { id, .. }
            | QueueEvent::Completed { id }
            | QueueEvent::Failed { id, .. }
            | QueueEvent::Removed { id } => Some(id),
            QueueEvent::Error { id, .. } => id.as_deref(),
            _ => None,
        }
    }

    /// Short description for logging
    pub fn description(&self) -> String {
        match self {
            QueueEvent::Active { id } => format!("Job {} active", id),
            QueueEvent::Progress { id, data } => format!("Job {} progress {}", id, data),
            QueueEvent::Completed { id } => format!("Job {} completed", id),
            QueueEvent::Failed { id, reason } => format!("Job {} failed: {}", id, reason),
            QueueEvent::Removed { id } => format!("Job {} removed", id),
            QueueEvent::Cleaned { jobs, state } => {
                format!("{} {} jobs cleaned", jobs.len(), state)
            }
            QueueEvent::Paused => "Queue paused".to_string(),
            QueueEvent::Resumed => "Queue resumed".to_string(),
            QueueEvent::Drained => "Queue drained".to_string(),
            QueueEvent::Error { id: Some(id), message } => {
                format!("Job {} error: {}", id, message)
            }
            QueueEvent::Error { id: None, message } => format!("Queue error: {}", message),
        }
    }
}

/// Receiving side of a queue's lifecycle events
///
/// Dropping or closing the subscription detaches it from the backend.
pub struct EventSubscription {
    queue: String,
    rx: Option<broadcast::Receiver<QueueEvent>>,
}

impl EventSubscription {
    /// Wrap a broadcast receiver
    pub fn new(queue: impl Into<String>, rx: broadcast::Receiver<QueueEvent>) -> Self {
        Self {
            queue: queue.into(),
            rx: Some(rx),
        }
    }

    /// Queue this subscription listens to
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the subscription is closed or the backend went
    /// away. Lagged receivers skip the missed events and keep going.
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Event subscription for queue {} lagged, {} events skipped",
                        self.queue,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stop receiving events
    pub fn close(&mut self) {
        self.rx = None;
    }

    /// Check if the subscription was closed
    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_and_job_id() {
        let event = QueueEvent::Progress {
            id: "7".into(),
            data: json!(100),
        };
        assert_eq!(event.kind(), "progress");
        assert_eq!(event.job_id(), Some("7"));

        assert_eq!(QueueEvent::Drained.job_id(), None);
        let cleaned = QueueEvent::Cleaned {
            jobs: vec!["1".into()],
            state: JobState::Completed,
        };
        assert_eq!(cleaned.kind(), "cleaned");
        assert_eq!(cleaned.job_id(), None);

        let err = QueueEvent::Error {
            id: None,
            message: "boom".into(),
        };
        assert_eq!(err.job_id(), None);
    }

    #[test]
    fn test_event_wire_format() {
        let event = QueueEvent::Cleaned {
            jobs: vec!["1".into(), "2".into()],
            state: JobState::Failed,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "cleaned", "jobs": ["1", "2"], "type": "failed"}));

        let parsed: QueueEvent = serde_json::from_value(json!({"event": "paused"})).unwrap();
        assert_eq!(parsed, QueueEvent::Paused);
    }

    #[tokio::test]
    async fn test_subscription_close() {
        let (tx, rx) = broadcast::channel(4);
        let mut sub = EventSubscription::new("jobs", rx);
        tx.send(QueueEvent::Drained).unwrap();
        assert_eq!(sub.recv().await, Some(QueueEvent::Drained));

        sub.close();
        assert!(sub.is_closed());
        assert!(tx.send(QueueEvent::Paused).is_err());
        assert_eq!(sub.recv().await, None);
    }
}
