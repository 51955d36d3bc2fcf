//! Storage layer
//!
//! Provides the Redis key layout and client wrapper used by
//! [`crate::queue::RedisBackend`].

pub mod keys;
pub mod redis;

pub use keys::Keys;
pub use redis::{ConnectionConfig, RedisClient, Subscriber};
