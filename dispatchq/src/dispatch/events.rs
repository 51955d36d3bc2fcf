//! Queue event translation
//!
//! Maps a [`QueueEvent`] to the framework event name and payload it is
//! re-emitted as.

use crate::queue::QueueEvent;
use serde_json::{json, Value};

/// Payload of the framework event for `event`
pub fn event_payload(event: &QueueEvent) -> Option<Value> {
    match event {
        QueueEvent::Progress { id, data } => Some(json!({ "id": id, "progress": data })),
        QueueEvent::Cleaned { jobs, state } => {
            Some(json!({ "id": Value::Null, "jobs": jobs, "type": state }))
        }
        QueueEvent::Active { id }
        | QueueEvent::Completed { id }
        | QueueEvent::Failed { id, .. }
        | QueueEvent::Removed { id } => Some(json!({ "id": id })),
        QueueEvent::Error { id: Some(id), .. } => Some(json!({ "id": id })),
        QueueEvent::Error { id: None, .. }
        | QueueEvent::Paused
        | QueueEvent::Resumed
        | QueueEvent::Drained => None,
    }
}

/// `"<jobName>.<type>"`, or just `"<type>"` when the job is unknown
pub fn event_name(job_name: Option<&str>, event: &QueueEvent) -> String {
    match job_name {
        Some(name) if !name.is_empty() => format!("{}.{}", name, event.kind()),
        _ => event.kind().to_string(),
    }
}
