//! Remote key/value cache provider.
//!
//! Documents travel as JSON strings. The client is abstracted behind
//! [`KeyValueClient`] so any string store can back the cache; a Redis client
//! is available with the `redis` feature.

use std::sync::RwLock;

use async_trait::async_trait;
use tessera_core::{CacheError, Document};
use tracing::{debug, warn};

use super::cache_key::CacheKey;
use super::traits::{CacheProvider, CacheStats};

/// Minimal string key/value client.
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Release the connection.
    async fn close(&self) -> Result<(), CacheError>;
}

/// Cache provider over a [`KeyValueClient`].
///
/// Read failures (client errors and undecodable payloads) reach the caller.
/// Write and delete failures are logged and swallowed.
pub struct RemoteCache<C> {
    client: C,
    stats: RwLock<CacheStats>,
}

impl<C: KeyValueClient> RemoteCache<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

#[async_trait]
impl<C: KeyValueClient> CacheProvider for RemoteCache<C> {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, CacheError> {
        let raw = self.client.get(&key.encode()).await?;
        self.record(|s| {
            s.gets += 1;
            if raw.is_some() {
                s.hits += 1;
            } else {
                s.misses += 1;
            }
        });
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, doc: &Document) {
        let json = match serde_json::to_string(doc) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "cache set skipped: document not serializable");
                return;
            }
        };
        let bytes = json.len() as u64;
        match self.client.set(&key.encode(), json).await {
            Ok(()) => self.record(|s| {
                s.sets += 1;
                s.memory_bytes += bytes;
            }),
            Err(e) => warn!(key = %key, error = %e, "cache set failed"),
        }
    }

    async fn delete(&self, key: &CacheKey) {
        match self.client.delete(&key.encode()).await {
            Ok(()) => self.record(|s| s.deletes += 1),
            Err(e) => warn!(key = %key, error = %e, "cache delete failed"),
        }
    }

    async fn close(&self, flush: bool) {
        debug!(flush, "closing remote cache client");
        if let Err(e) = self.client.close().await {
            warn!(error = %e, "remote cache close failed");
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}

// ============================================================================
// REDIS CLIENT
// ============================================================================

#[cfg(feature = "redis")]
mod redis_client {
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use tessera_core::CacheError;

    use super::KeyValueClient;

    /// [`KeyValueClient`] backed by a Redis connection manager.
    #[derive(Clone)]
    pub struct RedisClient {
        manager: ConnectionManager,
    }

    impl RedisClient {
        /// Connect to `url` (for example `redis://127.0.0.1/`).
        pub async fn connect(url: &str) -> Result<Self, CacheError> {
            let client = redis::Client::open(url).map_err(|e| CacheError::Connection {
                reason: e.to_string(),
            })?;
            let manager = ConnectionManager::new(client)
                .await
                .map_err(|e| CacheError::Connection {
                    reason: e.to_string(),
                })?;
            Ok(Self { manager })
        }
    }

    fn backend(e: redis::RedisError) -> CacheError {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }

    #[async_trait]
    impl KeyValueClient for RedisClient {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            let mut conn = self.manager.clone();
            conn.get(key).await.map_err(backend)
        }

        async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
            let mut conn = self.manager.clone();
            conn.set::<_, _, ()>(key, value).await.map_err(backend)
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            let mut conn = self.manager.clone();
            conn.del::<_, ()>(key).await.map_err(backend)
        }

        async fn close(&self) -> Result<(), CacheError> {
            // The manager's connection closes when the last clone drops.
            Ok(())
        }
    }
}

#[cfg(feature = "redis")]
pub use redis_client::RedisClient;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tessera_core::{json, DocumentId};

    #[derive(Default)]
    struct MapClient {
        data: Mutex<HashMap<String, String>>,
        broken: AtomicBool,
        closed: AtomicBool,
    }

    impl MapClient {
        fn check(&self) -> Result<(), CacheError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(CacheError::Connection {
                    reason: "connection reset".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KeyValueClient for MapClient {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.check()?;
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
            self.check()?;
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.check()?;
            self.data.lock().unwrap().remove(key);
            Ok(())
        }

        async fn close(&self) -> Result<(), CacheError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("tessera", "db", "items", DocumentId::from("k"))
    }

    #[tokio::test]
    async fn test_documents_travel_as_json() {
        let cache = RemoteCache::new(MapClient::default());
        let doc = json!({"_id": "k", "n": [1, 2]}).as_object().cloned().unwrap();
        cache.set(&key(), &doc).await;

        let raw = cache.client().data.lock().unwrap().get("tessera_db_items_k").cloned();
        assert_eq!(raw.as_deref(), Some(r#"{"_id":"k","n":[1,2]}"#));
        assert_eq!(cache.get(&key()).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_get_surfaces_client_failure() {
        let cache = RemoteCache::new(MapClient::default());
        cache.client().broken.store(true, Ordering::SeqCst);
        let err = cache.get(&key()).await.unwrap_err();
        assert!(matches!(err, CacheError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_get_surfaces_decode_failure() {
        let cache = RemoteCache::new(MapClient::default());
        cache
            .client()
            .data
            .lock()
            .unwrap()
            .insert(key().encode(), "not json".to_string());
        let err = cache.get(&key()).await.unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_write_failures_are_swallowed() {
        let cache = RemoteCache::new(MapClient::default());
        cache.client().broken.store(true, Ordering::SeqCst);
        let doc = json!({"_id": "k"}).as_object().cloned().unwrap();
        cache.set(&key(), &doc).await;
        cache.delete(&key()).await;
        assert_eq!(cache.stats().sets, 0);
        assert_eq!(cache.stats().deletes, 0);
    }

    #[tokio::test]
    async fn test_close_closes_client() {
        let cache = RemoteCache::new(MapClient::default());
        cache.close(true).await;
        assert!(cache.client().closed.load(Ordering::SeqCst));
    }
}
