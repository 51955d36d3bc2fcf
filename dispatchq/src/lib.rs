//! # dispatchq
//!
//! dispatchq lets the actions of a service be invoked asynchronously through
//! a job queue instead of synchronously.
//!
//! ## Features
//!
//! - Queue a call to any action of any service, with priority, delay,
//!   retries with backoff and custom job ids
//! - One worker per service that replays its queued jobs as local calls,
//!   carrying the caller's metadata and tracing correlation across the queue
//! - Queue lifecycle events re-emitted as broker events
//! - Pause, resume, clean and job lookup per queue
//! - In-memory and Redis queue backends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dispatchq::broker::{Context, LocalBroker};
//! use dispatchq::dispatch::{self, QueueSettings};
//! use dispatchq::queue::JobOptions;
//! use dispatchq::service::{handler_fn, ActionDef, ServiceSchema};
//! use dispatchq::storage::ConnectionConfig;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Arc::new(LocalBroker::new());
//!
//!     let schema = ServiceSchema::new("images").action(ActionDef::queued(
//!         "resize",
//!         handler_fn(|mut ctx: Context| async move {
//!             if let Some(job) = ctx.locals.job.as_mut() {
//!                 job.update_progress(100).await?;
//!             }
//!             Ok(json!({ "resized": ctx.params }))
//!         }),
//!     ));
//!
//!     let settings = QueueSettings::new()
//!         .connection(ConnectionConfig::new("redis://localhost:6379"));
//!     let images = dispatch::mount(schema, broker.clone(), settings).await?;
//!
//!     let job = images
//!         .local_queue(&Context::new(), "resize", json!({ "width": 42 }), JobOptions::new())
//!         .await?;
//!     println!("queued job {}", job.id);
//!
//!     images.stop().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Public module exports
pub mod config;
pub mod error;

// Job queue
pub mod queue;

// Storage layer
pub mod storage;

// RPC/event framework
pub mod broker;

// Services and actions
pub mod service;

// Queue-backed dispatch
pub mod dispatch;

// Re-export common types
pub use broker::{Broker, Context};
pub use dispatch::{JobDispatcher, QueueSettings};
pub use error::{Error, Result};
pub use queue::{Job, JobOptions, JobState, QueueBackend, QueueEvent};
