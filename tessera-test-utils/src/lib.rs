//! Tessera Test Utilities
//!
//! Shared helpers for Tessera tests:
//! - Proptest generators for identities, field names and documents
//! - Fixtures wiring repositories over the in-memory store
//! - Failure-injecting store and cache wrappers
//! - Custom assertions on `TesseraResult`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

pub use tessera_core::*;
pub use tessera_storage::*;

// ============================================================================
// TRACING
// ============================================================================

/// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for documents and their identities.

    use super::*;
    use proptest::prelude::*;

    /// Generate an ObjectId from arbitrary bytes.
    pub fn arb_object_id() -> impl Strategy<Value = ObjectId> {
        any::<[u8; 12]>().prop_map(ObjectId::from_bytes)
    }

    /// Generate a DocumentId of any kind.
    pub fn arb_document_id() -> impl Strategy<Value = DocumentId> {
        prop_oneof![
            arb_object_id().prop_map(DocumentId::ObjectId),
            "[a-z][a-z0-9_]{0,15}".prop_map(DocumentId::String),
            any::<i64>().prop_map(DocumentId::Int),
        ]
    }

    /// Generate a top-level field name: no dots, no `$`, never `_id`.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,9}"
    }

    /// Generate a scalar value. Numbers are integers so equality is exact.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-1_000_000i64..1_000_000).prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,24}".prop_map(Value::String),
        ]
    }

    /// Generate a value nested at most one level deep.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => arb_scalar(),
            1 => prop::collection::vec(arb_scalar(), 0..5).prop_map(Value::Array),
            1 => prop::collection::btree_map(arb_field_name(), arb_scalar(), 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    }

    /// Generate a document without `_id`.
    pub fn arb_document() -> impl Strategy<Value = Document> {
        prop::collection::btree_map(arb_field_name(), arb_value(), 0..8)
            .prop_map(|fields| fields.into_iter().collect())
    }

    /// Generate a document carrying `_id`.
    pub fn arb_stored_document() -> impl Strategy<Value = (DocumentId, Document)> {
        (arb_document_id(), arb_document()).prop_map(|(id, mut doc)| {
            doc.insert(ID_FIELD.to_string(), id.to_value());
            (id, doc)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired repositories and contexts over the in-memory store.

    use super::*;

    /// Namespace used by every fixture.
    pub const TEST_NAMESPACE: &str = "test";

    /// Build a document from a `json!` object literal. Panics on non-objects.
    pub fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture document must be an object, got {}", other),
        }
    }

    /// Repository over a fresh in-memory collection, cached in memory.
    pub fn cached_repository(collection: &str) -> (CacheAsideRepository, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let repo = CacheAsideRepository::new(
            Arc::new(InMemoryCollection::new("app", collection)),
            RepositoryConfig::default(),
            Some(cache.clone() as Arc<dyn CacheProvider>),
            TEST_NAMESPACE,
        );
        (repo, cache)
    }

    /// Repository over a fresh in-memory collection with caching off.
    pub fn uncached_repository(collection: &str) -> CacheAsideRepository {
        CacheAsideRepository::new(
            Arc::new(InMemoryCollection::new("app", collection)),
            RepositoryConfig::default(),
            None,
            TEST_NAMESPACE,
        )
    }

    /// Cached repository over a [`FailingCollection`], with handles to both.
    pub fn failing_repository(
        collection: &str,
    ) -> (CacheAsideRepository, Arc<FailingCollection>, Arc<MemoryCache>) {
        let store = Arc::new(FailingCollection::new(Arc::new(InMemoryCollection::new(
            "app", collection,
        ))));
        let cache = Arc::new(MemoryCache::new());
        let repo = CacheAsideRepository::new(
            store.clone(),
            RepositoryConfig::default(),
            Some(cache.clone() as Arc<dyn CacheProvider>),
            TEST_NAMESPACE,
        );
        (repo, store, cache)
    }

    /// Context with a memory cache and in-memory databases, registering each
    /// `(database, collection)` pair.
    pub async fn context_with(
        collections: &[(&str, &str)],
    ) -> TesseraResult<(TesseraContext, Arc<MemoryCache>)> {
        let mut databases: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (database, collection) in collections {
            databases.entry(*database).or_default().push(*collection);
        }

        let cache = Arc::new(MemoryCache::new());
        let context = TesseraContext::new(
            Some(cache.clone() as Arc<dyn CacheProvider>),
            TEST_NAMESPACE,
        );
        let connector = InMemoryConnector::new();
        for (name, collections) in databases {
            let config = DatabaseConfig::with_collections(name, collections).without_discovery();
            let database = connector.connect(&config).await?;
            context.attach(database, &config).await?;
        }
        Ok((context, cache))
    }
}

// ============================================================================
// FAILURE INJECTION
// ============================================================================

fn offline_error(collection: &str) -> TesseraError {
    StorageError::Connection {
        target: collection.to_string(),
        reason: "store offline".to_string(),
    }
    .into()
}

/// Collection wrapper that can be taken offline, or made to break cursors
/// after a number of documents.
pub struct FailingCollection {
    inner: Arc<dyn DocumentCollection>,
    offline: AtomicBool,
    /// `usize::MAX` means cursors never fail.
    fail_after: AtomicUsize,
}

impl FailingCollection {
    pub fn new(inner: Arc<dyn DocumentCollection>) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
            fail_after: AtomicUsize::new(usize::MAX),
        }
    }

    /// Every operation fails with a connection error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Cursors opened from now on yield `n` documents, then an error.
    pub fn fail_cursor_after(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    fn check(&self) -> TesseraResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error(self.inner.name()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentCollection for FailingCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn database_name(&self) -> &str {
        self.inner.database_name()
    }

    async fn find_one(
        &self,
        query: &Document,
        projection: Option<&Document>,
    ) -> TesseraResult<Option<Document>> {
        self.check()?;
        self.inner.find_one(query, projection).await
    }

    async fn find(&self, query: &Document, options: FindOptions) -> TesseraResult<DocumentStream> {
        self.check()?;
        let cursor = self.inner.find(query, options).await?;
        let limit = self.fail_after.load(Ordering::SeqCst);
        if limit == usize::MAX {
            return Ok(cursor);
        }
        let error: TesseraError = StorageError::Cursor {
            collection: self.inner.name().to_string(),
            reason: format!("cursor broken after {} documents", limit),
        }
        .into();
        Ok(Box::pin(
            cursor
                .take(limit)
                .chain(stream::once(async move { Err(error) })),
        ))
    }

    async fn count(&self, query: &Document) -> TesseraResult<u64> {
        self.check()?;
        self.inner.count(query).await
    }

    async fn insert(&self, doc: Document, write_concern: WriteConcern) -> TesseraResult<Document> {
        self.check()?;
        self.inner.insert(doc, write_concern).await
    }

    async fn find_and_modify(
        &self,
        query: &Document,
        sort: Option<&Document>,
        update: &Document,
        options: FindAndModifyOptions,
    ) -> TesseraResult<Option<Document>> {
        self.check()?;
        self.inner.find_and_modify(query, sort, update, options).await
    }

    async fn update(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> TesseraResult<u64> {
        self.check()?;
        self.inner.update(query, update, options).await
    }

    async fn remove(&self, query: &Document, options: RemoveOptions) -> TesseraResult<u64> {
        self.check()?;
        self.inner.remove(query, options).await
    }

    async fn create_index(&self, keys: &Document, options: IndexOptions) -> TesseraResult<String> {
        self.check()?;
        self.inner.create_index(keys, options).await
    }

    async fn drop_index(&self, name: &str) -> TesseraResult<bool> {
        self.check()?;
        self.inner.drop_index(name).await
    }

    async fn index_information(&self) -> TesseraResult<Vec<IndexInfo>> {
        self.check()?;
        self.inner.index_information().await
    }
}

/// Memory cache whose reads can be made to fail.
#[derive(Default)]
pub struct FailingCache {
    inner: MemoryCache,
    fail_reads: AtomicBool,
}

impl FailingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheProvider for FailingCache {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Document>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Connection {
                reason: "cache unreachable".to_string(),
            });
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, doc: &Document) {
        self.inner.set(key, doc).await
    }

    async fn delete(&self, key: &CacheKey) {
        self.inner.delete(key).await
    }

    async fn close(&self, flush: bool) {
        self.inner.close(flush).await
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on `TesseraResult` that look through operation context.

    use super::*;

    /// Assert that a TesseraResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that the root cause is a store error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(e) if e.is_storage() => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that the root cause is a cache error.
    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(e) if e.is_cache() => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    /// Assert that the root cause is a reference error.
    #[track_caller]
    pub fn assert_reference_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result.as_ref().map_err(TesseraError::root) {
            Err(TesseraError::Reference(_)) => {}
            other => panic!("Expected Reference error, got: {:?}", other),
        }
    }

    /// Assert that an error carries operation context for `operation`.
    #[track_caller]
    pub fn assert_operation<T: std::fmt::Debug>(result: &TesseraResult<T>, operation: &str) {
        match result {
            Err(TesseraError::Operation { operation: op, .. }) => {
                assert_eq!(*op, operation, "Wrong operation in error context");
            }
            other => panic!("Expected error from {}, got: {:?}", operation, other),
        }
    }

    /// Assert that the cache holds exactly `expected` under `key`.
    pub async fn assert_cached(cache: &dyn CacheProvider, key: &CacheKey, expected: &Document) {
        let cached = cache.get(key).await;
        assert_eq!(
            cached.as_ref().ok().and_then(Option::as_ref),
            Some(expected),
            "cache entry for {}",
            key
        );
    }

    /// Assert that the cache holds nothing under `key`.
    pub async fn assert_not_cached(cache: &dyn CacheProvider, key: &CacheKey) {
        let cached = cache.get(key).await;
        assert!(matches!(cached, Ok(None)), "Expected no entry for {}, got: {:?}", key, cached);
    }
}

// ============================================================================
// TESTS
// ============================================================================
