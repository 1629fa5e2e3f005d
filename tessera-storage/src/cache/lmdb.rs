//! LMDB-backed cache provider.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cached documents in a
//! memory-mapped file that survives restarts.
//!
//! # Value Layout
//!
//! `[cached_at: 8 bytes, little-endian unix millis][JSON document]`
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions; `set` and
//! `delete` each commit one write transaction. Statistics sit behind a lock.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tessera_core::{CacheError, Document};
use tracing::{info, warn};

use super::cache_key::CacheKey;
use super::traits::{CacheProvider, CacheStats};

/// Length of the timestamp prefix on every stored value.
const TIMESTAMP_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::EnvOpen(reason) | LmdbCacheError::DbOpen(reason) => {
                CacheError::Connection { reason }
            }
            LmdbCacheError::Serialization(reason) => CacheError::Serialization(reason),
            LmdbCacheError::Deserialization(reason) => CacheError::Deserialization(reason),
            other => CacheError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Persistent cache in an LMDB environment.
pub struct LmdbCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbCache {
    /// Open (or create) the environment in directory `path`.
    ///
    /// `max_size_mb` is the LMDB map size; writes fail once it is full.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        let entries = {
            let rtxn = env.read_txn().map_err(txn_error)?;
            db.len(&rtxn).map_err(txn_error)?
        };

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats {
                entry_count: entries,
                ..CacheStats::default()
            }),
        })
    }

    /// Cached document with the time it was written.
    pub fn get_with_timestamp(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(Document, DateTime<Utc>)>, LmdbCacheError> {
        let encoded = key.encode();
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let found = self.db.get(&rtxn, encoded.as_bytes()).map_err(txn_error)?;
        self.record(|s| {
            s.gets += 1;
            if found.is_some() {
                s.hits += 1;
            } else {
                s.misses += 1;
            }
        });

        let Some(bytes) = found else {
            return Ok(None);
        };
        if bytes.len() < TIMESTAMP_LEN {
            return Err(LmdbCacheError::Deserialization(
                "value shorter than timestamp prefix".to_string(),
            ));
        }
        let mut millis = [0u8; TIMESTAMP_LEN];
        millis.copy_from_slice(&bytes[..TIMESTAMP_LEN]);
        let cached_at =
            DateTime::from_timestamp_millis(i64::from_le_bytes(millis)).unwrap_or_else(Utc::now);
        let doc: Document = serde_json::from_slice(&bytes[TIMESTAMP_LEN..])
            .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
        Ok(Some((doc, cached_at)))
    }

    fn try_set(&self, key: &CacheKey, doc: &Document) -> Result<(), LmdbCacheError> {
        let encoded = key.encode();
        let json =
            serde_json::to_vec(doc).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let mut value = Vec::with_capacity(TIMESTAMP_LEN + json.len());
        value.extend_from_slice(&Utc::now().timestamp_millis().to_le_bytes());
        value.extend_from_slice(&json);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let existed = self
            .db
            .get(&wtxn, encoded.as_bytes())
            .map_err(txn_error)?
            .is_some();
        self.db
            .put(&mut wtxn, encoded.as_bytes(), &value)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        let written = value.len() as u64;
        self.record(|s| {
            s.sets += 1;
            s.memory_bytes += written;
            if existed {
                s.updates += 1;
            } else {
                s.inserts += 1;
                s.entry_count += 1;
            }
        });
        Ok(())
    }

    fn try_delete(&self, key: &CacheKey) -> Result<(), LmdbCacheError> {
        let encoded = key.encode();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .db
            .delete(&mut wtxn, encoded.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        self.record(|s| {
            s.deletes += 1;
            if deleted {
                s.entry_count = s.entry_count.saturating_sub(1);
            }
        });
        Ok(())
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

#[async_trait]
impl CacheProvider for LmdbCache {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, CacheError> {
        Ok(self.get_with_timestamp(key)?.map(|(doc, _)| doc))
    }

    async fn set(&self, key: &CacheKey, doc: &Document) {
        if let Err(e) = self.try_set(key, doc) {
            warn!(key = %key, error = %e, "lmdb cache set failed");
        }
    }

    async fn delete(&self, key: &CacheKey) {
        if let Err(e) = self.try_delete(key) {
            warn!(key = %key, error = %e, "lmdb cache delete failed");
        }
    }

    async fn close(&self, flush: bool) {
        if flush {
            if let Err(e) = self.env.force_sync() {
                warn!(error = %e, "lmdb cache sync failed");
            }
        }
        let stats = self.stats();
        info!(
            flush,
            hits = stats.hits,
            misses = stats.misses,
            entries = stats.entry_count,
            bytes_written = stats.memory_bytes,
            "lmdb cache closed"
        );
    }

    fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tessera_core::{json, DocumentId, ObjectId, Value};

    fn create_test_cache() -> (LmdbCache, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = LmdbCache::open(temp_dir.path(), 10).expect("cache creation should succeed");
        (cache, temp_dir)
    }

    fn key(id: DocumentId) -> CacheKey {
        CacheKey::new("tessera", "db", "items", id)
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (cache, _temp_dir) = create_test_cache();
        let id = DocumentId::ObjectId(ObjectId::new());
        let stored = doc(json!({"_id": id.to_value(), "name": "x", "tags": ["a"]}));

        let before = Utc::now();
        cache.set(&key(id.clone()), &stored).await;
        let (found, cached_at) = cache
            .get_with_timestamp(&key(id))
            .expect("get should succeed")
            .expect("entry should exist");
        assert_eq!(found, stored);
        assert!((cached_at - before).num_seconds().abs() < 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (cache, _temp_dir) = create_test_cache();
        let found = cache
            .get(&key(DocumentId::from("missing")))
            .await
            .expect("get should succeed");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (cache, _temp_dir) = create_test_cache();
        let k = key(DocumentId::from("a"));
        cache.set(&k, &doc(json!({"_id": "a"}))).await;
        assert!(cache.get(&k).await.unwrap().is_some());

        cache.delete(&k).await;
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_track_entries_and_bytes() {
        let (cache, _temp_dir) = create_test_cache();
        let a = key(DocumentId::from("a"));
        let b = key(DocumentId::from("b"));
        cache.set(&a, &doc(json!({"_id": "a"}))).await;
        cache.set(&a, &doc(json!({"_id": "a", "v": 2}))).await;
        cache.set(&b, &doc(json!({"_id": "b"}))).await;
        cache.get(&a).await.unwrap();
        cache.get(&key(DocumentId::from("zz"))).await.unwrap();
        cache.delete(&b).await;

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.inserts, 2);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.memory_bytes > 0);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let k = key(DocumentId::Int(7));
        {
            let cache = LmdbCache::open(temp_dir.path(), 10).unwrap();
            cache.set(&k, &doc(json!({"_id": 7, "kept": true}))).await;
            cache.close(true).await;
        }
        let cache = LmdbCache::open(temp_dir.path(), 10).unwrap();
        assert_eq!(cache.stats().entry_count, 1);
        let found = cache.get(&k).await.unwrap().unwrap();
        assert_eq!(found.get("kept"), Some(&json!(true)));
    }
}
