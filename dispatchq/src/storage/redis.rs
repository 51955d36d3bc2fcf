//! Redis client wrapper
//!
//! Provides type-safe Redis operation interfaces over a fred connection pool,
//! plus a dedicated subscriber connection for pub/sub.

use crate::{Error, Result};
use fred::{
    interfaces::*,
    prelude::*,
    types::{Message, ReconnectPolicy, RedisConfig as FredRedisConfig, SetOptions},
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Redis connection URL
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Read the connection URL from `REDIS_URL`, if set
    pub fn from_env() -> Option<Self> {
        std::env::var("REDIS_URL").ok().map(Self::new)
    }

    /// Set pool size
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    fn fred_config(&self) -> Result<FredRedisConfig> {
        FredRedisConfig::from_url(&self.url)
            .map_err(|e| Error::Config(format!("invalid Redis URL {}: {}", self.url, e)))
    }
}

/// Redis client
#[derive(Clone)]
pub struct RedisClient {
    pool: Arc<RedisPool>,
    config: ConnectionConfig,
}

impl RedisClient {
    /// Create a new Redis client
    pub async fn new(config: ConnectionConfig) -> Result<Self> {
        let pool = RedisPool::new(
            config.fred_config()?,
            None,
            None,
            Some(ReconnectPolicy::default()),
            config.pool_size,
        )?;

        pool.init().await?;
        tracing::debug!("Connected to Redis at {}", config.url);

        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    /// Create client from connection URL
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(ConnectionConfig::new(url)).await
    }

    /// Get the underlying Redis connection pool
    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }

    /// Ping Redis
    pub async fn ping(&self) -> Result<String> {
        let result: String = self.pool.ping().await?;
        Ok(result)
    }

    /// Set Key-Value
    pub async fn set(&self, key: RedisKey, value: RedisValue) -> Result<()> {
        let _: () = self.pool.set(key, value, None, None, false).await?;
        Ok(())
    }

    /// Set Key-Value only if the key does not exist; returns whether it was set
    pub async fn set_nx(&self, key: RedisKey, value: RedisValue) -> Result<bool> {
        let result: Option<String> = self
            .pool
            .set(key, value, None, Some(SetOptions::NX), false)
            .await?;
        Ok(result.is_some())
    }

    /// Get Value
    pub async fn get(&self, key: RedisKey) -> Result<Option<RedisValue>> {
        let result: Option<RedisValue> = self.pool.get(key).await?;
        Ok(result)
    }

    /// Delete Key
    pub async fn del(&self, keys: Vec<RedisKey>) -> Result<usize> {
        let result: usize = self.pool.del(keys).await?;
        Ok(result)
    }

    /// Check if Key exists
    pub async fn exists(&self, key: RedisKey) -> Result<bool> {
        let result: bool = self.pool.exists(key).await?;
        Ok(result)
    }

    /// Increment a counter
    pub async fn incr(&self, key: RedisKey) -> Result<i64> {
        let result: i64 = self.pool.incr(key).await?;
        Ok(result)
    }

    /// Sorted Set operation: add
    pub async fn zadd(&self, key: RedisKey, member: RedisValue, score: i64) -> Result<()> {
        let values: Vec<(f64, RedisValue)> = vec![(score as f64, member)];
        let _: () = self.pool.zadd(key, None, None, false, false, values).await?;
        Ok(())
    }

    /// Sorted Set operation: pop the member with the lowest score
    pub async fn zpopmin(&self, key: RedisKey) -> Result<Option<String>> {
        let result: Vec<RedisValue> = self.pool.zpopmin(key, None).await?;
        Ok(result.first().and_then(|v| v.as_string()))
    }

    /// Sorted Set operation: get all members in score order
    pub async fn zrange_all(&self, key: RedisKey) -> Result<Vec<String>> {
        let result: Vec<RedisValue> = self
            .pool
            .zrange(key, 0, -1, None, false, None, false)
            .await?;
        Ok(result.into_iter().filter_map(|v| v.as_string()).collect())
    }

    /// Sorted Set operation: get by score range
    pub async fn zrangebyscore(&self, key: RedisKey, min: i64, max: i64) -> Result<Vec<String>> {
        let result: Vec<RedisValue> = self
            .pool
            .zrangebyscore(key, min, max, false, None)
            .await?;
        Ok(result.into_iter().filter_map(|v| v.as_string()).collect())
    }

    /// Sorted Set operation: remove
    pub async fn zrem(&self, key: RedisKey, member: RedisValue) -> Result<bool> {
        let result: u64 = self.pool.zrem(key, member).await?;
        Ok(result > 0)
    }

    /// Sorted Set operation: get cardinality (number of elements)
    pub async fn zcard(&self, key: RedisKey) -> Result<u64> {
        let result: u64 = self.pool.zcard(key).await?;
        Ok(result)
    }

    /// Set operation: add
    pub async fn sadd(&self, key: RedisKey, member: RedisValue) -> Result<bool> {
        let result: u64 = self.pool.sadd(key, member).await?;
        Ok(result > 0)
    }

    /// Set operation: check if member exists
    pub async fn sismember(&self, key: RedisKey, member: RedisValue) -> Result<bool> {
        let result: bool = self.pool.sismember(key, member).await?;
        Ok(result)
    }

    /// Set operation: remove
    pub async fn srem(&self, key: RedisKey, member: RedisValue) -> Result<bool> {
        let result: u64 = self.pool.srem(key, member).await?;
        Ok(result > 0)
    }

    /// Set operation: get cardinality
    pub async fn scard(&self, key: RedisKey) -> Result<u64> {
        let result: u64 = self.pool.scard(key).await?;
        Ok(result)
    }

    /// Publish a message on a channel
    pub async fn publish(&self, channel: &str, message: String) -> Result<()> {
        let _: i64 = self.pool.next().publish(channel, message).await?;
        Ok(())
    }

    /// Open a dedicated connection for pub/sub
    pub async fn subscriber(&self) -> Result<Subscriber> {
        let client = fred::clients::RedisClient::new(
            self.config.fred_config()?,
            None,
            None,
            Some(ReconnectPolicy::default()),
        );
        client.init().await?;
        Ok(Subscriber { client })
    }

    /// Close all pooled connections
    pub async fn quit(&self) -> Result<()> {
        self.pool.quit().await?;
        Ok(())
    }
}

/// Pub/sub connection
pub struct Subscriber {
    client: fred::clients::RedisClient,
}

impl Subscriber {
    /// Subscribe to a channel
    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        let _: () = self.client.subscribe(channel).await?;
        Ok(())
    }

    /// Receiver for every message delivered to this connection
    pub fn messages(&self) -> broadcast::Receiver<Message> {
        self.client.message_rx()
    }

    /// Close the connection
    pub async fn quit(&self) -> Result<()> {
        let _: () = self.client.quit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config() {
        let config = ConnectionConfig::new("redis://cache:6380").pool_size(0);
        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.pool_size, 1);
        assert!(config.fred_config().is_ok());

        let bad = ConnectionConfig::new("not a url");
        assert!(matches!(bad.fred_config(), Err(Error::Config(_))));
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_redis_ping() {
        let redis_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let client = RedisClient::from_url(&redis_url).await.unwrap();
        let result = client.ping().await.unwrap();
        assert_eq!(result, "PONG");
    }
}
