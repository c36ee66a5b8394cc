//! Redis-backed tagged cache
//!
//! Each tag is a Redis set of the full keys registered under it.

use super::ReportCache;
use crate::config::CacheSettings;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tokio::sync::RwLock;
use tracing::debug;

/// Redis cache client
pub struct RedisCache {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl RedisCache {
    /// Connect using the cache settings
    pub async fn new(settings: &CacheSettings) -> Result<Self> {
        let client = Client::open(settings.url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: settings.key_prefix.clone(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.key_prefix, tag)
    }
}

#[async_trait]
impl ReportCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, hit = value.is_some(), "Cache get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, tags: &[String]) -> Result<()> {
        let full_key = self.key(key);

        let mut pipe = redis::pipe();
        pipe.atomic().set(&full_key, value).ignore();
        for tag in tags {
            pipe.sadd(self.tag_key(tag), &full_key).ignore();
        }

        let mut conn = self.connection.write().await;
        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, tags = tags.len(), "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let deleted: i64 = conn.del(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to delete key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let tag_key = self.tag_key(tag);
        let mut conn = self.connection.write().await;

        let members: Vec<String> = conn.smembers(&tag_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to read tag '{}': {}", tag, e),
        })?;

        let mut doomed = members;
        doomed.push(tag_key.clone());
        let deleted: i64 = conn.del(&doomed).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to invalidate tag '{}': {}", tag, e),
        })?;

        // The tag set itself is one of the deleted keys when it existed.
        let removed = (deleted - 1).max(0) as u64;
        debug!(tag = %tag, removed, "Cache tag invalidated");
        Ok(removed)
    }

    /// Ping Redis to check connectivity
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}
