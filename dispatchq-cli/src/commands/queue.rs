//! Queue command handlers
//!
//! Provides commands for counting, pausing, resuming and cleaning queues.

use clap::Subcommand;
use color_eyre::Result;
use dispatchq::queue::{JobState, QueueBackend};
use std::time::Duration;

/// Queue actions
#[derive(Subcommand)]
pub enum QueueAction {
    /// Show job counts per state
    Counts {
        /// Queue name
        name: String,
    },
    /// Pause queue for every worker
    Pause {
        /// Queue name
        name: String,
    },
    /// Resume queue
    Resume {
        /// Queue name
        name: String,
    },
    /// Remove finished jobs
    Clean {
        /// Queue name
        name: String,
        /// State to clean (completed, failed, delayed, waiting)
        #[arg(long, default_value = "completed")]
        state: JobState,
        /// Only remove jobs older than this many seconds
        #[arg(long, default_value = "0")]
        grace: u64,
        /// Maximum number of jobs to remove (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,
    },
}

/// Handle queue command
///
/// # Arguments
/// * `backend` - Queue backend
/// * `action` - Queue action to execute
pub async fn handle(backend: &dyn QueueBackend, action: QueueAction) -> Result<()> {
    match action {
        QueueAction::Counts { name } => show_counts(backend, &name).await?,
        QueueAction::Pause { name } => {
            backend.pause(&name).await?;
            println!("Queue '{}' paused", name);
        }
        QueueAction::Resume { name } => {
            backend.resume(&name).await?;
            println!("Queue '{}' resumed", name);
        }
        QueueAction::Clean {
            name,
            state,
            grace,
            limit,
        } => {
            let removed = backend
                .clean(&name, Duration::from_secs(grace), limit, state)
                .await?;
            println!("Queue '{}' cleaned, removed {} {} jobs", name, removed.len(), state);
            for id in removed {
                println!("  - {}", id);
            }
        }
    }
    Ok(())
}

/// Show queue counts
async fn show_counts(backend: &dyn QueueBackend, name: &str) -> Result<()> {
    let counts = backend.counts(name).await?;

    println!("Queue: {}{}", name, if counts.paused { " (paused)" } else { "" });
    println!("  Waiting: {}", counts.waiting);
    println!("  Delayed: {}", counts.delayed);
    println!("  Active: {}", counts.active);
    println!("  Completed: {}", counts.completed);
    println!("  Failed: {}", counts.failed);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatchq::queue::{JobOptions, MemoryBackend};
    use serde_json::json;

    #[tokio::test]
    async fn test_pause_resume_and_clean() {
        let backend = MemoryBackend::new();
        handle(&backend, QueueAction::Pause { name: "images".into() })
            .await
            .unwrap();
        assert!(backend.is_paused("images").await.unwrap());
        handle(&backend, QueueAction::Resume { name: "images".into() })
            .await
            .unwrap();
        assert!(!backend.is_paused("images").await.unwrap());

        let job = backend
            .add("images", "resize", json!({}), JobOptions::new())
            .await
            .unwrap();
        backend.move_to_active("images").await.unwrap();
        backend
            .move_to_completed("images", &job.id, json!(null))
            .await
            .unwrap();

        handle(
            &backend,
            QueueAction::Clean {
                name: "images".into(),
                state: JobState::Completed,
                grace: 0,
                limit: 0,
            },
        )
        .await
        .unwrap();
        assert_eq!(backend.counts("images").await.unwrap().completed, 0);
    }
}
