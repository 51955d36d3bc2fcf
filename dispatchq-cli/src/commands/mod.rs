//! Command handlers for the dispatchq CLI
//!
//! Queue control, job inspection and event tailing.

pub mod events;
pub mod job;
pub mod queue;
