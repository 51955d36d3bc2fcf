//! Queue-backed action dispatch
//!
//! A [`JobDispatcher`] belongs to one service. It turns calls into queued
//! jobs, runs the worker that replays the service's own jobs as local action
//! calls, and re-emits the lifecycle events of the service's queue through
//! the broker.
//!
//! ```rust,no_run
//! use dispatchq::broker::{Context, LocalBroker};
//! use dispatchq::dispatch::{self, QueueSettings};
//! use dispatchq::queue::{JobOptions, MemoryBackend};
//! use dispatchq::service::{handler_fn, ActionDef, ServiceSchema};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> dispatchq::Result<()> {
//! let broker = Arc::new(LocalBroker::new());
//! let schema = ServiceSchema::new("images").action(ActionDef::queued(
//!     "resize",
//!     handler_fn(|ctx: Context| async move { Ok(ctx.params) }),
//! ));
//! let settings = QueueSettings::new().backend(Arc::new(MemoryBackend::new()));
//!
//! let images = dispatch::mount(schema, broker.clone(), settings).await?;
//! let job = images
//!     .local_queue(&Context::new(), "resize", json!({"width": 42}), JobOptions::new())
//!     .await?;
//! println!("queued job {}", job.id);
//!
//! images.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::broker::{Broker, Context, EmitOptions, LocalBroker};
use crate::queue::{Job, JobState, QueueBackend, QueueEvent, RedisBackend, Worker, WorkerOptions};
use crate::service::ServiceSchema;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};

pub mod events;
pub mod handle;
pub mod job_ref;
pub mod payload;
pub mod populate;
pub mod processor;
pub mod settings;

pub use handle::QueueHandle;
pub use job_ref::JobRef;
pub use payload::JobPayload;
pub use populate::JobPopulator;
pub use processor::ActionProcessor;
pub use settings::QueueSettings;

/// Task re-emitting the events of the service's queue
struct EventForwarder {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Per-service dispatcher
pub struct JobDispatcher {
    service: String,
    queued_actions: Vec<String>,
    broker: Arc<dyn Broker>,
    backend: Arc<dyn QueueBackend>,
    owns_backend: bool,
    worker_options: WorkerOptions,
    scheduler_interval: Duration,
    handles: Mutex<HashMap<String, Arc<QueueHandle>>>,
    worker: Mutex<Option<Arc<Worker>>>,
    forwarder: Mutex<Option<EventForwarder>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("service", &self.service)
            .field("queued_actions", &self.queued_actions)
            .field("backend", &self.backend.kind())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

/// Create a dispatcher for `schema`, register the service on `broker` with
/// the [`JobPopulator`] hook and start the dispatcher
pub async fn mount(
    schema: ServiceSchema,
    broker: Arc<LocalBroker>,
    settings: QueueSettings,
) -> Result<Arc<JobDispatcher>> {
    let dispatcher = JobDispatcher::new(&schema, broker.clone(), settings).await?;
    broker.register(schema.hook(dispatcher.populator())).await;
    dispatcher.start().await?;
    Ok(dispatcher)
}

impl JobDispatcher {
    /// Create the dispatcher of a service
    ///
    /// Fails with [`Error::Config`] when no backend can be resolved.
    pub async fn new(
        schema: &ServiceSchema,
        broker: Arc<dyn Broker>,
        settings: QueueSettings,
    ) -> Result<Arc<Self>> {
        let (backend, owns_backend) = match &settings.backend {
            Some(backend) => (backend.clone(), false),
            None => {
                let connection = settings
                    .connection
                    .clone()
                    .or_else(|| broker.cacher_connection())
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "service '{}' has no queue backend, connection or broker cacher",
                            schema.name()
                        ))
                    })?;
                let backend: Arc<dyn QueueBackend> = Arc::new(RedisBackend::connect(connection).await?);
                (backend, true)
            }
        };

        Ok(Arc::new(Self {
            service: schema.name().to_string(),
            queued_actions: schema.queued_actions(),
            broker,
            backend,
            owns_backend,
            worker_options: settings.worker,
            scheduler_interval: settings.scheduler_interval,
            handles: Mutex::new(HashMap::new()),
            worker: Mutex::new(None),
            forwarder: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Service name, also the name of the service's own queue
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Backend the dispatcher's queues live on
    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    /// Hook that exposes the triggering job to the service's handlers
    pub fn populator(self: &Arc<Self>) -> JobPopulator {
        JobPopulator::new(Arc::downgrade(self))
    }

    /// Check if the service runs a worker
    pub async fn has_worker(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Start the worker and event forwarding
    ///
    /// Does nothing for services without queued actions.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed(self.service.clone()));
        }
        if self.queued_actions.is_empty() {
            tracing::debug!("Service '{}' has no queued actions, no worker started", self.service);
            return Ok(());
        }

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }

        // Own handle runs the scheduler that promotes delayed jobs
        self.resolve(&self.service).await?;

        let mut subscription = self.backend.subscribe(&self.service).await?;
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let dispatcher = Arc::downgrade(self);
        let service = self.service.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    event = subscription.recv() => {
                        let Some(event) = event else { break };
                        let Some(dispatcher) = dispatcher.upgrade() else { break };
                        if let Err(e) = dispatcher.transform_event(event).await {
                            tracing::warn!("Failed to re-emit event of queue {}: {}", service, e);
                        }
                    }
                }
            }
            subscription.close();
            tracing::debug!("Event forwarding for queue {} stopped", service);
        });
        *self.forwarder.lock().await = Some(EventForwarder { cancel, task });

        let processor = Arc::new(ActionProcessor::new(self.service.clone(), self.broker.clone()));
        *worker = Some(Arc::new(Worker::start(
            self.service.clone(),
            self.backend.clone(),
            processor,
            self.worker_options.clone(),
        )));

        tracing::info!(
            "Service '{}' dispatching queued actions {:?}",
            self.service,
            self.queued_actions
        );
        Ok(())
    }

    /// Tear down: worker, then event forwarding, then every queue handle
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.close().await;
        }

        let forwarder = self.forwarder.lock().await.take();
        if let Some(forwarder) = forwarder {
            let _ = forwarder.cancel.send(());
            if let Err(e) = forwarder.task.await {
                tracing::error!("Event forwarding of queue {} ended abnormally: {}", self.service, e);
            }
        }

        let handles: Vec<Arc<QueueHandle>> =
            self.handles.lock().await.drain().map(|(_, handle)| handle).collect();
        let mut closing = JoinSet::new();
        for handle in handles {
            closing.spawn(async move { handle.close().await });
        }
        while let Some(res) = closing.join_next().await {
            if let Err(e) = res {
                tracing::error!("Failed to close queue handle: {}", e);
            }
        }

        if self.owns_backend {
            self.backend.close().await?;
        }
        tracing::info!("Service '{}' dispatcher stopped", self.service);
        Ok(())
    }

    /// Handle of a named queue, opened on first use
    pub async fn resolve(&self, name: &str) -> Result<Arc<QueueHandle>> {
        let mut handles = self.handles.lock().await;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed(name.to_string()));
        }
        let handle = handles.entry(name.to_string()).or_insert_with(|| {
            Arc::new(QueueHandle::open(
                name,
                self.backend.clone(),
                self.scheduler_interval,
            ))
        });
        Ok(handle.clone())
    }

    /// Queue a call of `action` on the queue `name`
    ///
    /// The job carries `params`, the caller's meta and the caller's parent
    /// span; `opts` are handed to the queue as they are.
    pub async fn queue(
        &self,
        ctx: &Context,
        name: &str,
        action: &str,
        params: Value,
        opts: crate::queue::JobOptions,
    ) -> Result<Job> {
        let payload = JobPayload::from_context(ctx, params).to_value()?;
        let job = self.resolve(name).await?.add(action, payload, opts).await?;
        tracing::debug!("Queued {} for service '{}'", job.description(), self.service);
        Ok(job)
    }

    /// Queue a call of one of the service's own actions
    pub async fn local_queue(
        &self,
        ctx: &Context,
        action: &str,
        params: Value,
        opts: crate::queue::JobOptions,
    ) -> Result<Job> {
        self.queue(ctx, &self.service, action, params, opts).await
    }

    /// Fetch a job of a named queue; `None` if it does not exist
    pub async fn job_in_queue(&self, name: &str, id: &str) -> Result<Option<Job>> {
        self.resolve(name).await?.get_job(id).await
    }

    /// Fetch a job of the service's own queue; `None` if it does not exist
    pub async fn job_in_own_queue(&self, id: &str) -> Result<Option<Job>> {
        self.job_in_queue(&self.service, id).await
    }

    /// Fetch a job as a [`JobRef`]
    pub async fn job_ref(&self, name: &str, id: &str) -> Result<Option<JobRef>> {
        Ok(self
            .job_in_queue(name, id)
            .await?
            .map(|job| JobRef::new(job, self.backend.clone())))
    }

    /// Pause a named queue everywhere, or only this service's worker
    pub async fn pause(&self, name: Option<&str>) -> Result<()> {
        match name {
            Some(name) => self.resolve(name).await?.pause().await,
            None => {
                if let Some(worker) = self.worker.lock().await.as_ref() {
                    worker.pause();
                }
                Ok(())
            }
        }
    }

    /// Resume a named queue everywhere, or only this service's worker
    pub async fn resume(&self, name: Option<&str>) -> Result<()> {
        match name {
            Some(name) => self.resolve(name).await?.resume().await,
            None => {
                if let Some(worker) = self.worker.lock().await.as_ref() {
                    worker.resume();
                }
                Ok(())
            }
        }
    }

    /// Remove jobs in `state` older than `grace` from a named queue (or the
    /// service's own queue); returns the removed ids
    pub async fn clean(
        &self,
        name: Option<&str>,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> Result<Vec<String>> {
        let name = name.unwrap_or(&self.service);
        self.resolve(name).await?.clean(grace, limit, state).await
    }

    /// Re-emit a lifecycle event of the service's queue through the broker
    ///
    /// Emits `"<service>.<jobName>.<type>"` and `"<jobName>.<type>"` (the
    /// latter restricted to the service's group). The job name segment is
    /// left out when the event carries no job id or the job no longer
    /// exists.
    pub async fn transform_event(&self, event: QueueEvent) -> Result<()> {
        tracing::trace!("Queue {}: {}", self.service, event.description());

        let payload = events::event_payload(&event);
        let mut opts = EmitOptions::for_queue(&self.service);
        let mut job_name = None;

        if let Some(id) = event.job_id() {
            match self.backend.get_job(&self.service, id).await {
                Ok(Some(job)) if !job.name.is_empty() => {
                    match JobPayload::from_job(&job) {
                        Ok(stored) => {
                            let stored = stored.with_job_meta(&job.id, &self.service);
                            opts = EmitOptions {
                                meta: stored.meta,
                                parent_span: stored.parent_span,
                                groups: Vec::new(),
                            };
                        }
                        Err(e) => {
                            tracing::warn!("Job {} of queue {} has an undecodable payload: {}", id, self.service, e);
                        }
                    }
                    job_name = Some(job.name);
                }
                Ok(_) => {
                    tracing::debug!("Job {} of queue {} is gone, emitting {} without it", id, self.service, event.kind());
                }
                Err(e) => {
                    tracing::warn!("Failed to load job {} of queue {}: {}", id, self.service, e);
                }
            }
        }

        let name = events::event_name(job_name.as_deref(), &event);
        self.broker
            .emit(&format!("{}.{}", self.service, name), payload.clone(), opts.clone())
            .await?;
        self.broker
            .emit(&name, payload, opts.with_groups(vec![self.service.clone()]))
            .await
    }
}
