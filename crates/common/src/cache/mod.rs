//! Fast cache layer
//!
//! Entries never expire on their own. Every entry carries tags, and
//! invalidating a tag drops every entry that was set with it. Values are
//! opaque strings; [`get_json`] and [`set_json`] handle encoding.

mod memory;
mod redis_cache;

pub use memory::InMemoryCache;
pub use redis_cache::RedisCache;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Tag-invalidated key/value cache
#[async_trait]
pub trait ReportCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value and register it under every tag
    async fn set(&self, key: &str, value: &str, tags: &[String]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Drop every entry set with `tag`; returns how many were removed
    async fn invalidate_tag(&self, tag: &str) -> Result<u64>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Read and decode a cached JSON value
pub async fn get_json<T: DeserializeOwned>(cache: &dyn ReportCache, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to parse cached value for '{}': {}", key, e),
            }),
        None => Ok(None),
    }
}

/// Encode and cache a JSON value
pub async fn set_json<T: Serialize>(
    cache: &dyn ReportCache,
    key: &str,
    value: &T,
    tags: &[String],
) -> Result<()> {
    let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
        message: format!("Failed to serialize value: {}", e),
    })?;
    cache.set(key, &json, tags).await
}

/// Cache key and tag builders
pub mod keys {
    /// Tag carried by every report and report-list entry
    pub const REPORT_LIST_TAG: &str = "report_list";

    /// Current report of one kind for one subject
    pub fn report(kind: &str, subject: &str) -> String {
        format!("report:{}:{}", kind, subject)
    }

    /// Current reports of every kind for one subject
    pub fn report_list(subject: &str) -> String {
        format!("report_list:{}", subject)
    }

    pub fn subject_tag(subject: &str) -> String {
        format!("subject:{}", subject)
    }

    pub fn kind_tag(kind: &str) -> String {
        format!("kind:{}", kind)
    }

    pub fn report_list_tag(subject: &str) -> String {
        format!("report_list:{}", subject)
    }

    /// Tags for a single-report entry
    pub fn report_tags(kind: &str, subject: &str) -> Vec<String> {
        vec![
            subject_tag(subject),
            kind_tag(kind),
            REPORT_LIST_TAG.to_string(),
        ]
    }

    /// Tags for a report-list entry
    pub fn report_list_tags(subject: &str) -> Vec<String> {
        vec![
            subject_tag(subject),
            report_list_tag(subject),
            REPORT_LIST_TAG.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::report("work_style", "u1"), "report:work_style:u1");
        assert_eq!(keys::report_list("u1"), "report_list:u1");
        assert_eq!(
            keys::report_tags("work_style", "u1"),
            vec!["subject:u1", "kind:work_style", "report_list"]
        );
        assert!(keys::report_list_tags("u1").contains(&keys::REPORT_LIST_TAG.to_string()));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = InMemoryCache::new();
        set_json(&cache, "k", &json!({"a": 1}), &[]).await.unwrap();

        let value: Option<serde_json::Value> = get_json(&cache, "k").await.unwrap();
        assert_eq!(value, Some(json!({"a": 1})));

        let missing: Option<serde_json::Value> = get_json(&cache, "nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_cache_error() {
        let cache = InMemoryCache::new();
        cache.set("k", "not json", &[]).await.unwrap();

        let result: Result<Option<serde_json::Value>> = get_json(&cache, "k").await;
        assert!(matches!(result, Err(AppError::CacheError { .. })));
    }
}
