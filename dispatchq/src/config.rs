//! dispatchq global configuration module
//!
//! Library-wide defaults for key naming, polling, scheduling and payload
//! limits. Per-service settings live in [`crate::dispatch::QueueSettings`].

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// dispatchq global configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Prefix for every Redis key and pub/sub channel (default: "dispatchq")
    pub key_prefix: String,

    /// Worker poll interval in milliseconds when a queue is empty (default: 100)
    pub poll_interval_ms: u64,

    /// Delayed-job scheduler tick in milliseconds (default: 1000)
    pub scheduler_interval_ms: u64,

    /// Capacity of in-process lifecycle event channels (default: 1024)
    pub event_capacity: usize,

    /// Maximum encoded job data size in bytes (default: 512KB)
    pub max_payload_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            key_prefix: "dispatchq".to_string(),
            poll_interval_ms: 100,
            scheduler_interval_ms: 1000,
            event_capacity: 1024,
            max_payload_size: 512 * 1024,
        }
    }
}

impl DispatchConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set key prefix
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set worker poll interval
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set scheduler interval
    #[must_use]
    pub fn with_scheduler_interval_ms(mut self, ms: u64) -> Self {
        self.scheduler_interval_ms = ms;
        self
    }

    /// Set event channel capacity
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set maximum payload size
    #[must_use]
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }
}

static GLOBAL_CONFIG: Lazy<RwLock<DispatchConfig>> =
    Lazy::new(|| RwLock::new(DispatchConfig::default()));

/// Get the current global configuration
pub fn get_config() -> DispatchConfig {
    match GLOBAL_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => {
            tracing::error!("Global config lock poisoned, using last written value");
            poisoned.into_inner().clone()
        }
    }
}

/// Set the global configuration
pub fn set_config(config: DispatchConfig) {
    update_config(|global| *global = config);
}

/// Update the global configuration in place
///
/// ```rust
/// use dispatchq::config::update_config;
///
/// update_config(|config| {
///     config.poll_interval_ms = 20;
/// });
/// ```
pub fn update_config<F>(modifier: F)
where
    F: FnOnce(&mut DispatchConfig),
{
    let mut global = match GLOBAL_CONFIG.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    modifier(&mut global);
    tracing::info!("Global dispatchq configuration updated");
}

/// Get the key prefix
pub fn get_key_prefix() -> String {
    get_config().key_prefix
}

/// Get the maximum payload size
pub fn get_max_payload_size() -> usize {
    get_config().max_payload_size
}
