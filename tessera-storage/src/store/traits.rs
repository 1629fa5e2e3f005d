//! Async document store binding.
//!
//! These traits are the only way the repository talks to the backing store.
//! Each primitive is a single round trip; atomicity is whatever the store
//! gives one operation.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use tessera_core::{DatabaseConfig, Document, TesseraResult};

use super::options::{
    FindAndModifyOptions, FindOptions, IndexInfo, IndexOptions, RemoveOptions, UpdateOptions,
    WriteConcern,
};

/// Cursor over query results, delivered one document at a time.
///
/// Dropping the stream cancels the cursor. A store error is yielded as an
/// `Err` item.
pub type DocumentStream = Pin<Box<dyn Stream<Item = TesseraResult<Document>> + Send>>;

/// Primitive operations on one named collection.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    // ========================================================================
    // IDENTITY
    // ========================================================================

    /// Collection name.
    fn name(&self) -> &str;

    /// Name of the database this collection lives in.
    fn database_name(&self) -> &str;

    // ========================================================================
    // READS
    // ========================================================================

    /// First document matching `query`, restricted to `projection` if given.
    async fn find_one(
        &self,
        query: &Document,
        projection: Option<&Document>,
    ) -> TesseraResult<Option<Document>>;

    /// Cursor over every document matching `query`.
    async fn find(&self, query: &Document, options: FindOptions) -> TesseraResult<DocumentStream>;

    /// Number of documents matching `query`.
    async fn count(&self, query: &Document) -> TesseraResult<u64>;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert one document, assigning `_id` if missing. Returns the stored
    /// document.
    async fn insert(&self, doc: Document, write_concern: WriteConcern) -> TesseraResult<Document>;

    /// Match, mutate and return one document atomically.
    ///
    /// `sort` picks among several matches. Returns the post-update document
    /// when `options.return_new` is set, otherwise the pre-update one; `None`
    /// when nothing matched and no upsert happened.
    async fn find_and_modify(
        &self,
        query: &Document,
        sort: Option<&Document>,
        update: &Document,
        options: FindAndModifyOptions,
    ) -> TesseraResult<Option<Document>>;

    /// Apply `update` to the first (or every, with `multi`) match. Returns
    /// the number of documents matched.
    async fn update(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> TesseraResult<u64>;

    /// Remove the first (with `just_one`) or every match. Returns the number
    /// removed.
    async fn remove(&self, query: &Document, options: RemoveOptions) -> TesseraResult<u64>;

    // ========================================================================
    // INDEXES
    // ========================================================================

    /// Create an index over `keys` (`{field: 1 | -1}`), returning its name.
    async fn create_index(&self, keys: &Document, options: IndexOptions) -> TesseraResult<String>;

    /// Drop an index by name. Returns whether it existed.
    async fn drop_index(&self, name: &str) -> TesseraResult<bool>;

    /// Every index on the collection, including the implicit `_id_` index.
    async fn index_information(&self) -> TesseraResult<Vec<IndexInfo>>;
}

/// A database handle.
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Database name.
    fn name(&self) -> &str;

    /// Raw collection names as the store reports them.
    async fn collection_names(&self) -> TesseraResult<Vec<String>>;

    /// Handle to a collection; the collection need not exist yet.
    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection>;

    /// Release the connection.
    async fn close(&self) -> TesseraResult<()>;
}

/// Opens database handles from configuration.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, config: &DatabaseConfig) -> TesseraResult<Arc<dyn DocumentDatabase>>;
}
