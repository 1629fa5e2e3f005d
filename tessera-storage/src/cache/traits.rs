//! Cache provider trait and usage statistics.

use async_trait::async_trait;
use tessera_core::{CacheError, Document};

use super::cache_key::CacheKey;

/// Pluggable document cache.
///
/// Implementations must be safe to share between tasks. Only `get` has a
/// failure channel: `set`, `delete` and `close` log problems and return.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Short provider name used in log lines.
    fn name(&self) -> &'static str;

    /// Cached document for `key`, or `None` on a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, CacheError>;

    /// Store the full document under `key`, replacing any previous entry.
    async fn set(&self, key: &CacheKey, doc: &Document);

    /// Drop the entry for `key` if there is one.
    async fn delete(&self, key: &CacheKey);

    /// Release the provider. `flush` asks for pending writes to be made
    /// durable first where the backend supports it.
    async fn close(&self, flush: bool);

    /// Usage counters since the provider was created.
    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get` calls.
    pub gets: u64,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of `set` calls.
    pub sets: u64,
    /// Sets that created a new entry.
    pub inserts: u64,
    /// Sets that replaced an existing entry.
    pub updates: u64,
    /// Number of `delete` calls.
    pub deletes: u64,
    /// Number of entries currently in cache, where the provider knows it.
    pub entry_count: u64,
    /// Approximate bytes written.
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
