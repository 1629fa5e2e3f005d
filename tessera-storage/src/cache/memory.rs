//! In-process cache provider.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tessera_core::{CacheError, Document};
use tracing::{info, warn};

use super::cache_key::CacheKey;
use super::traits::{CacheProvider, CacheStats};

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Document>,
    stats: CacheStats,
}

/// Map-backed cache living in this process.
///
/// Holds documents until they are deleted; there is no eviction. Counts every
/// get, hit, miss, set (split into inserts and updates) and delete.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<MemoryCacheInner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached documents.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, CacheError> {
        let mut inner = self.inner.write().map_err(|_| CacheError::Backend {
            reason: "memory cache lock poisoned".to_string(),
        })?;
        let found = inner.entries.get(&key.encode()).cloned();
        inner.stats.gets += 1;
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        Ok(found)
    }

    async fn set(&self, key: &CacheKey, doc: &Document) {
        let Ok(mut inner) = self.inner.write() else {
            warn!(key = %key, "memory cache lock poisoned, set skipped");
            return;
        };
        inner.stats.sets += 1;
        let replaced = inner.entries.insert(key.encode(), doc.clone()).is_some();
        if replaced {
            inner.stats.updates += 1;
        } else {
            inner.stats.inserts += 1;
        }
    }

    async fn delete(&self, key: &CacheKey) {
        let Ok(mut inner) = self.inner.write() else {
            warn!(key = %key, "memory cache lock poisoned, delete skipped");
            return;
        };
        inner.stats.deletes += 1;
        inner.entries.remove(&key.encode());
    }

    async fn close(&self, flush: bool) {
        let stats = self.stats();
        info!(
            flush,
            gets = stats.gets,
            hits = stats.hits,
            misses = stats.misses,
            sets = stats.sets,
            inserts = stats.inserts,
            updates = stats.updates,
            deletes = stats.deletes,
            "memory cache closed"
        );
    }

    fn stats(&self) -> CacheStats {
        self.inner
            .read()
            .map(|i| CacheStats {
                entry_count: i.entries.len() as u64,
                ..i.stats.clone()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{json, DocumentId, Value};

    fn key(id: &str) -> CacheKey {
        CacheKey::new("tessera", "db", "items", DocumentId::from(id))
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        assert!(cache.get(&key("a")).await.unwrap().is_none());

        cache.set(&key("a"), &doc(json!({"_id": "a", "n": 1}))).await;
        let found = cache.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(found.get("n"), Some(&json!(1)));
        assert_eq!(cache.len(), 1);

        cache.delete(&key("a")).await;
        assert!(cache.get(&key("a")).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_stats_split_inserts_and_updates() {
        let cache = MemoryCache::new();
        cache.set(&key("a"), &doc(json!({"_id": "a"}))).await;
        cache.set(&key("a"), &doc(json!({"_id": "a", "x": 1}))).await;
        cache.set(&key("b"), &doc(json!({"_id": "b"}))).await;
        cache.get(&key("a")).await.unwrap();
        cache.get(&key("c")).await.unwrap();
        cache.delete(&key("b")).await;

        let stats = cache.stats();
        assert_eq!(stats.sets, 3);
        assert_eq!(stats.inserts, 2);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_set_replaces_whole_document() {
        let cache = MemoryCache::new();
        cache.set(&key("a"), &doc(json!({"_id": "a", "old": true}))).await;
        cache.set(&key("a"), &doc(json!({"_id": "a", "new": true}))).await;
        let found = cache.get(&key("a")).await.unwrap().unwrap();
        assert!(found.get("old").is_none());
        assert_eq!(found.get("new"), Some(&json!(true)));
    }
}
