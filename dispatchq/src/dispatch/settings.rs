//! Per-service queue settings

use crate::config;
use crate::queue::{QueueBackend, WorkerOptions};
use crate::storage::ConnectionConfig;
use std::sync::Arc;
use std::time::Duration;

/// Queue settings of one service
///
/// The backend is resolved in this order: an explicit backend, an explicit
/// connection, the broker's cache store connection.
///
/// # Example
///
/// ```rust
/// use dispatchq::dispatch::QueueSettings;
/// use dispatchq::queue::WorkerOptions;
/// use dispatchq::storage::ConnectionConfig;
///
/// let settings = QueueSettings::new()
///     .connection(ConnectionConfig::new("redis://localhost:6379"))
///     .worker(WorkerOptions::new().concurrency(4));
/// assert_eq!(settings.worker.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct QueueSettings {
    /// Backend shared with other components
    pub backend: Option<Arc<dyn QueueBackend>>,
    /// Dedicated Redis connection
    pub connection: Option<ConnectionConfig>,
    /// Options of the service's worker
    pub worker: WorkerOptions,
    /// Tick of the delayed-job scheduler of each queue handle
    pub scheduler_interval: Duration,
}

impl std::fmt::Debug for QueueSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSettings")
            .field("backend", &self.backend.as_ref().map(|b| b.kind()))
            .field("connection", &self.connection)
            .field("worker", &self.worker)
            .field("scheduler_interval", &self.scheduler_interval)
            .finish()
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: None,
            connection: None,
            worker: WorkerOptions::default(),
            scheduler_interval: Duration::from_millis(config::get_config().scheduler_interval_ms),
        }
    }
}

impl QueueSettings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing backend
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn QueueBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Connect to a dedicated Redis
    #[must_use]
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Set worker options
    #[must_use]
    pub fn worker(mut self, worker: WorkerOptions) -> Self {
        self.worker = worker;
        self
    }

    /// Set scheduler tick
    #[must_use]
    pub fn scheduler_interval(mut self, interval: Duration) -> Self {
        self.scheduler_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBackend;

    #[test]
    fn test_defaults() {
        let settings = QueueSettings::default();
        assert!(settings.backend.is_none());
        assert!(settings.connection.is_none());
        assert_eq!(settings.worker.concurrency, 1);
    }

    #[test]
    fn test_builder() {
        let settings = QueueSettings::new()
            .backend(Arc::new(MemoryBackend::new()))
            .scheduler_interval(Duration::from_millis(10));
        assert_eq!(settings.scheduler_interval, Duration::from_millis(10));
        assert!(format!("{:?}", settings).contains("memory"));
    }
}
