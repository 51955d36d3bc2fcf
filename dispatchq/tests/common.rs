//! Common test utilities
//!
//! Shared helper functions and fixtures for integration tests.

#![allow(dead_code)]

use dispatchq::broker::{Context, EmittedEvent, LocalBroker};
use dispatchq::dispatch::{self, JobDispatcher, QueueSettings};
use dispatchq::queue::{MemoryBackend, WorkerOptions};
use dispatchq::service::{handler_fn, ActionDef, ServiceSchema};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Route library logs to the test output; controlled by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How long `wait_for` polls before failing the test
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `check` until it returns true, failing the test after [`WAIT_TIMEOUT`]
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    loop {
        if check().await {
            return;
        }
        if started.elapsed() > WAIT_TIMEOUT {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Records every event emitted through a broker
pub struct EventRecorder {
    events: Arc<Mutex<Vec<EmittedEvent>>>,
    task: JoinHandle<()>,
}

impl EventRecorder {
    /// Start recording
    pub fn start(broker: &LocalBroker) -> Self {
        let mut rx = broker.subscribe_events();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.lock().unwrap().push(event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { events, task }
    }

    /// Every recorded event
    pub fn all(&self) -> Vec<EmittedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Names of the recorded events, in emission order
    pub fn names(&self) -> Vec<String> {
        self.all().into_iter().map(|e| e.name).collect()
    }

    /// Recorded events with the given name
    pub fn named(&self, name: &str) -> Vec<EmittedEvent> {
        self.all().into_iter().filter(|e| e.name == name).collect()
    }

    /// Check if an event with the given name was recorded
    pub fn has(&self, name: &str) -> bool {
        !self.named(name).is_empty()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Wait for the first event with the given name
    pub async fn wait_for_event(&self, name: &str) -> EmittedEvent {
        let recorder = self;
        wait_for(&format!("event {}", name), || async move { recorder.has(name) }).await;
        self.named(name).remove(0)
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Broker, shared in-memory backend and event recorder of one test
pub struct Harness {
    pub broker: Arc<LocalBroker>,
    pub backend: Arc<MemoryBackend>,
    pub events: EventRecorder,
}

impl Harness {
    /// Create a fresh harness
    pub fn new() -> Self {
        init_tracing();
        let broker = Arc::new(LocalBroker::new());
        let events = EventRecorder::start(&broker);
        Self {
            broker,
            backend: Arc::new(MemoryBackend::new()),
            events,
        }
    }

    /// Settings with short polling and scheduling intervals
    pub fn settings(&self) -> QueueSettings {
        QueueSettings::new()
            .backend(self.backend.clone())
            .scheduler_interval(Duration::from_millis(10))
            .worker(WorkerOptions::new().poll_interval(Duration::from_millis(5)))
    }

    /// Register and start a service
    pub async fn mount(&self, schema: ServiceSchema) -> Arc<JobDispatcher> {
        dispatch::mount(schema, self.broker.clone(), self.settings())
            .await
            .expect("Failed to mount service")
    }
}

/// Caller context with meta `{ bucket: "NGNLS2" }` and fixed correlation ids
pub fn caller() -> Context {
    let mut meta = serde_json::Map::new();
    meta.insert("bucket".into(), json!("NGNLS2"));
    Context::new()
        .with_meta(meta)
        .with_parent_id("parent-1")
        .with_request_id("request-1")
        .with_tracing(true)
}

/// `images` service with a queued `resize` action
///
/// `resize` reports progress 100 and returns
/// `{ bucket: meta.bucket, size: width * height, job: meta.job.id }`.
pub fn images_service() -> ServiceSchema {
    ServiceSchema::new("images").action(ActionDef::queued(
        "resize",
        handler_fn(|mut ctx: Context| async move {
            if let Some(job) = ctx.locals.job.as_mut() {
                job.update_progress(100).await?;
            }
            let width = ctx.params.get("width").and_then(Value::as_u64).unwrap_or(0);
            let height = ctx.params.get("height").and_then(Value::as_u64).unwrap_or(0);
            let job_id = ctx
                .meta
                .get("job")
                .and_then(|job| job.get("id"))
                .cloned()
                .unwrap_or(Value::Null);
            Ok(json!({
                "bucket": ctx.meta.get("bucket").cloned().unwrap_or(Value::Null),
                "size": width * height,
                "job": job_id,
            }))
        }),
    ))
}
