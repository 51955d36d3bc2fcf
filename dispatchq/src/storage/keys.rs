//! Redis Key manager
//!
//! Provides the key naming convention for queue data. Every key of a queue
//! shares the `<prefix>:<queue>:` namespace.

/// Redis Key manager
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    /// Create a key manager for the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Job record Key (String, MessagePack)
    /// Example: dispatchq:images:job:42
    pub fn job(&self, queue: &str, id: &str) -> String {
        format!("{}:{}:job:{}", self.prefix, queue, id)
    }

    /// Job id counter Key (String)
    pub fn id_counter(&self, queue: &str) -> String {
        format!("{}:{}:id", self.prefix, queue)
    }

    /// Waiting jobs Key (ZSet, scored by priority then insertion order)
    pub fn wait(&self, queue: &str) -> String {
        format!("{}:{}:wait", self.prefix, queue)
    }

    /// Delayed jobs Key (ZSet, scored by due time in milliseconds)
    pub fn delayed(&self, queue: &str) -> String {
        format!("{}:{}:delayed", self.prefix, queue)
    }

    /// Active jobs Key (Set)
    pub fn active(&self, queue: &str) -> String {
        format!("{}:{}:active", self.prefix, queue)
    }

    /// Completed jobs Key (ZSet, scored by finish time)
    pub fn completed(&self, queue: &str) -> String {
        format!("{}:{}:completed", self.prefix, queue)
    }

    /// Failed jobs Key (ZSet, scored by finish time)
    pub fn failed(&self, queue: &str) -> String {
        format!("{}:{}:failed", self.prefix, queue)
    }

    /// Queue pause marker Key (String)
    pub fn paused(&self, queue: &str) -> String {
        format!("{}:{}:paused", self.prefix, queue)
    }

    /// Marker set while the queue has had waiting jobs since it last drained
    pub fn pending(&self, queue: &str) -> String {
        format!("{}:{}:pending", self.prefix, queue)
    }

    /// Lifecycle event channel (pub/sub)
    pub fn events(&self, queue: &str) -> String {
        format!("{}:{}:events", self.prefix, queue)
    }

    /// Queue name of an event channel, if the channel belongs to this prefix
    pub fn queue_of_events<'a>(&self, channel: &'a str) -> Option<&'a str> {
        channel
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .strip_suffix(":events")
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(crate::config::get_key_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        let keys = Keys::new("dq");
        assert_eq!(keys.job("images", "42"), "dq:images:job:42");
        assert_eq!(keys.id_counter("images"), "dq:images:id");
        assert_eq!(keys.wait("images"), "dq:images:wait");
        assert_eq!(keys.delayed("images"), "dq:images:delayed");
        assert_eq!(keys.active("images"), "dq:images:active");
        assert_eq!(keys.completed("images"), "dq:images:completed");
        assert_eq!(keys.failed("images"), "dq:images:failed");
        assert_eq!(keys.paused("images"), "dq:images:paused");
        assert_eq!(keys.pending("images"), "dq:images:pending");
        assert_eq!(keys.events("images"), "dq:images:events");
    }

    #[test]
    fn test_queue_of_events() {
        let keys = Keys::new("dq");
        assert_eq!(keys.queue_of_events("dq:images:events"), Some("images"));
        assert_eq!(keys.queue_of_events("other:images:events"), None);
        assert_eq!(keys.queue_of_events("dq:images:wait"), None);
    }
}
