//! In-process tagged cache

use super::ReportCache;
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, String>,
    tags: HashMap<String, HashSet<String>>,
}

/// Tagged cache held in process memory
#[derive(Default)]
pub struct InMemoryCache {
    state: RwLock<CacheState>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.state.read().await.entries.contains_key(key)
    }
}

#[async_trait]
impl ReportCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, tags: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.insert(key.to_string(), value.to_string());
        for tag in tags {
            state
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.state.write().await.entries.remove(key).is_some())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(keys) = state.tags.remove(tag) else {
            return Ok(0);
        };

        let mut removed = 0;
        for key in keys {
            if state.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalidate_tag_drops_tagged_entries_only() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", &["subject:u1".into()]).await.unwrap();
        cache.set("b", "2", &["subject:u1".into(), "kind:k".into()]).await.unwrap();
        cache.set("c", "3", &["subject:u2".into()]).await.unwrap();

        assert_eq!(cache.invalidate_tag("subject:u1").await.unwrap(), 2);
        assert!(!cache.contains("a").await);
        assert!(!cache.contains("b").await);
        assert!(cache.contains("c").await);

        assert_eq!(cache.invalidate_tag("subject:u1").await.unwrap(), 0);
        assert_eq!(cache.invalidate_tag("kind:k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_do_not_expire() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", &[]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(cache.delete("a").await.unwrap());
        assert!(cache.is_empty().await);
    }
}
