//! The always-miss provider.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::{CacheError, Document};
use tracing::trace;

use super::cache_key::CacheKey;
use super::traits::{CacheProvider, CacheStats};

/// Provider that stores nothing. Every `get` misses.
#[derive(Debug, Default)]
pub struct NoCache {
    gets: AtomicU64,
}

impl NoCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheProvider for NoCache {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, CacheError> {
        trace!(key = %key, "cache get");
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, _doc: &Document) {
        trace!(key = %key, "cache set");
    }

    async fn delete(&self, key: &CacheKey) {
        trace!(key = %key, "cache delete");
    }

    async fn close(&self, flush: bool) {
        trace!(flush, "cache close");
    }

    fn stats(&self) -> CacheStats {
        let gets = self.gets.load(Ordering::Relaxed);
        CacheStats {
            gets,
            misses: gets,
            ..CacheStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{json, DocumentId};

    #[tokio::test]
    async fn test_always_misses() {
        let cache = NoCache::new();
        let key = CacheKey::new("ns", "db", "c", DocumentId::Int(1));
        let doc = json!({"_id": 1}).as_object().cloned().unwrap();

        cache.set(&key, &doc).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);
        cache.delete(&key).await;
        cache.close(true).await;

        let stats = cache.stats();
        assert_eq!(stats.gets, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 0);
    }
}
