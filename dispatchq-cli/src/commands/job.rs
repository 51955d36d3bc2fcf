//! Job command handlers
//!
//! Provides commands for showing, adding and removing jobs.

use crate::utils::{format_timestamp, shorten_string};
use clap::Subcommand;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use dispatchq::dispatch::JobPayload;
use dispatchq::queue::{JobOptions, QueueBackend};
use serde_json::Value;
use std::time::Duration;

/// Job actions
#[derive(Subcommand)]
pub enum JobAction {
    /// Show job details
    Show {
        /// Queue name
        queue: String,
        /// Job ID
        id: String,
    },
    /// Queue a call of an action
    Add {
        /// Queue name (the service owning the action)
        queue: String,
        /// Action name
        action: String,
        /// Call parameters as JSON
        #[arg(long, default_value = "{}")]
        params: String,
        /// Priority (1 is highest)
        #[arg(long)]
        priority: Option<u32>,
        /// Delay in milliseconds
        #[arg(long)]
        delay: Option<u64>,
        /// Total attempts
        #[arg(long)]
        attempts: Option<u32>,
        /// Custom job id
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Remove a job that is not running
    Remove {
        /// Queue name
        queue: String,
        /// Job ID
        id: String,
    },
}

/// Handle job command
///
/// # Arguments
/// * `backend` - Queue backend
/// * `action` - Job action to execute
pub async fn handle(backend: &dyn QueueBackend, action: JobAction) -> Result<()> {
    match action {
        JobAction::Show { queue, id } => show_job(backend, &queue, &id).await?,
        JobAction::Add {
            queue,
            action,
            params,
            priority,
            delay,
            attempts,
            job_id,
        } => {
            let params: Value = serde_json::from_str(&params)
                .map_err(|e| eyre!("--params is not valid JSON: {}", e))?;
            let mut opts = JobOptions::new();
            opts.priority = priority;
            opts.attempts = attempts;
            opts.job_id = job_id;
            if let Some(delay) = delay {
                opts = opts.delay(Duration::from_millis(delay));
            }

            let data = JobPayload {
                params,
                ..JobPayload::default()
            }
            .to_value()?;
            let job = backend.add(&queue, &action, data, opts).await?;
            println!("Queued job {} ({}) in queue '{}'", job.id, job.state, queue);
        }
        JobAction::Remove { queue, id } => {
            if backend.remove_job(&queue, &id).await? {
                println!("  ✓ Job {} removed", id);
            } else {
                println!("  ! Job {} not found in queue '{}'", id, queue);
            }
        }
    }
    Ok(())
}

/// Show job details
async fn show_job(backend: &dyn QueueBackend, queue: &str, id: &str) -> Result<()> {
    let Some(job) = backend.get_job(queue, id).await? else {
        println!("  ! Job {} not found in queue '{}'", id, queue);
        return Ok(());
    };

    println!("Job Details: {}", job.id);
    println!("  Action: {}.{}", job.queue, job.name);
    println!("  State: {}", job.state);
    println!("  Attempts: {}/{}", job.attempts_made, job.opts.max_attempts());
    println!("  Progress: {}", job.progress);
    println!("  Created at: {}", format_timestamp(job.timestamp));
    if let Some(processed) = job.processed_on {
        println!("  Processed at: {}", format_timestamp(processed));
    }
    if let Some(finished) = job.finished_on {
        println!("  Finished at: {}", format_timestamp(finished));
    }

    match JobPayload::from_job(&job) {
        Ok(payload) => {
            println!("  Params: {}", shorten_string(&payload.params.to_string(), 120));
            if !payload.meta.is_empty() {
                println!("  Meta: {}", shorten_string(&Value::Object(payload.meta).to_string(), 120));
            }
            if let Some(span) = payload.parent_span {
                println!(
                    "  Trace: {} (parent {})",
                    span.trace_id.as_deref().unwrap_or("-"),
                    span.id.as_deref().unwrap_or("-")
                );
            }
        }
        Err(_) => println!("  Data: {}", shorten_string(&job.data.to_string(), 120)),
    }
    if let Some(value) = job.return_value {
        println!("  Result: {}", shorten_string(&value.to_string(), 120));
    }
    if let Some(reason) = job.failed_reason {
        println!("  Failed reason: {}", reason);
    }

    Ok(())
}
