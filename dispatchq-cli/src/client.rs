//! Redis backend factory for CLI commands

use color_eyre::Result;
use dispatchq::queue::RedisBackend;
use dispatchq::storage::{Keys, RedisClient};

/// Connect to the Redis backend the services use
///
/// # Arguments
/// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
/// * `prefix` - Key prefix the services were configured with
pub async fn create_backend(redis_url: &str, prefix: &str) -> Result<RedisBackend> {
    let client = RedisClient::from_url(redis_url)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("cannot connect to {}: {}", redis_url, e))?;
    Ok(RedisBackend::with_client(client, Keys::new(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_create_backend() {
        let redis_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let backend = create_backend(&redis_url, "dispatchq-cli-test").await;
        assert!(backend.is_ok());
    }
}
