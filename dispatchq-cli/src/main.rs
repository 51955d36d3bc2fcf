//! dispatchq CLI - Command line tool for inspecting and controlling dispatch queues

mod client;
mod commands;
mod utils;

use clap::{Parser, Subcommand};
use commands::{events, job, queue};
use dispatchq::QueueBackend;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dispatchq")]
#[command(about = "dispatchq CLI - Inspect and control dispatch queues", long_about = None)]
#[command(version)]
struct Cli {
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379", global = true)]
    redis_url: String,

    /// Key prefix the services were configured with
    #[arg(long, default_value = "dispatchq", global = true)]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue operations
    Queue {
        #[command(subcommand)]
        action: queue::QueueAction,
    },
    /// Job operations
    Job {
        #[command(subcommand)]
        action: job::JobAction,
    },
    /// Print the lifecycle events of a queue as they happen
    Events {
        /// Queue name
        queue: String,
        /// Exit after this many events
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let backend = client::create_backend(&cli.redis_url, &cli.prefix).await?;

    let result = match cli.command {
        Commands::Queue { action } => queue::handle(&backend, action).await,
        Commands::Job { action } => job::handle(&backend, action).await,
        Commands::Events { queue, count } => events::tail(&backend, &queue, count).await,
    };

    if let Err(e) = backend.close().await {
        tracing::warn!("Failed to close Redis connection: {}", e);
    }
    result
}
