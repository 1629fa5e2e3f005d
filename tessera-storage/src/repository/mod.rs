//! Cache-aside repository over one collection.
//!
//! Every operation goes to the store first; the cache is consulted only by
//! reads and written only after the store operation it depends on has
//! succeeded. With no cache configured the repository talks to the store
//! alone and every result is identical, only slower.

mod fields;
mod reference;

use std::fmt;
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tessera_core::{
    document_id, id_query, is_new, merge_defaults, ops, Document, DocumentId, RepositoryConfig,
    TesseraError, TesseraResult, ValidationError, Value, ID_FIELD,
};
use tracing::debug;

use crate::cache::{CacheKey, CacheProvider};
use crate::store::{
    DocumentCollection, DocumentStream, FindAndModifyOptions, FindOptions, RemoveOptions,
    UpdateOptions, WriteConcern,
};

pub use reference::{ReferenceResolver, ReferenceTarget};

/// Namespace, database and collection shared by every key of one repository.
#[derive(Debug, Clone)]
struct KeyScope {
    namespace: String,
    database: String,
    collection: String,
}

impl KeyScope {
    fn key(&self, id: DocumentId) -> CacheKey {
        CacheKey::new(&self.namespace, &self.database, &self.collection, id)
    }
}

/// Per-collection facade keeping a cache consistent with the store.
pub struct CacheAsideRepository {
    collection: Arc<dyn DocumentCollection>,
    cache: Option<Arc<dyn CacheProvider>>,
    config: RepositoryConfig,
    scope: KeyScope,
    resolver: ReferenceResolver,
}

impl fmt::Debug for CacheAsideRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheAsideRepository")
            .field("database", &self.scope.database)
            .field("collection", &self.scope.collection)
            .field("cache", &self.cache.as_ref().map(|c| c.name()))
            .finish()
    }
}

impl CacheAsideRepository {
    /// Repository over `collection`. `cache: None` disables caching.
    pub fn new(
        collection: Arc<dyn DocumentCollection>,
        config: RepositoryConfig,
        cache: Option<Arc<dyn CacheProvider>>,
        namespace: impl Into<String>,
    ) -> Self {
        let scope = KeyScope {
            namespace: namespace.into(),
            database: collection.database_name().to_string(),
            collection: collection.name().to_string(),
        };
        Self {
            collection,
            cache,
            config,
            scope,
            resolver: ReferenceResolver::detached(),
        }
    }

    /// Resolve cross-collection references through `resolver`.
    pub fn with_resolver(mut self, resolver: ReferenceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.scope.collection
    }

    pub fn database_name(&self) -> &str {
        &self.scope.database
    }

    /// The underlying store collection, for primitives the repository does
    /// not wrap.
    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheProvider>> {
        self.cache.as_ref()
    }

    /// Cache key of the document with `id`.
    pub fn cache_key(&self, id: &DocumentId) -> CacheKey {
        self.scope.key(id.clone())
    }

    fn in_operation(
        &self,
        operation: &'static str,
        id: Option<&DocumentId>,
    ) -> impl FnOnce(TesseraError) -> TesseraError + '_ {
        let id = id.map(ToString::to_string);
        move |e| e.in_operation(operation, self.scope.collection.clone(), id)
    }

    // ========================================================================
    // DOCUMENT LIFECYCLE
    // ========================================================================

    /// New unsaved document: `partial` laid over the configured defaults.
    pub fn create_new(&self, partial: Option<Document>) -> Document {
        merge_defaults(partial.unwrap_or_default(), self.config.defaults())
    }

    /// Whether `doc` has never been stored.
    pub fn is_new(&self, doc: &Document) -> bool {
        is_new(doc)
    }

    /// Fetch a document by ID, from the cache when possible.
    ///
    /// A cache miss reads the store and populates the cache. Concurrent
    /// misses for the same ID each go to the store.
    pub async fn load(&self, id: &DocumentId) -> TesseraResult<Option<Document>> {
        let query = id_query(id);
        let Some(cache) = &self.cache else {
            debug!(collection = %self.scope.collection, id = %id, "load find_one");
            return self
                .collection
                .find_one(&query, None)
                .await
                .map_err(self.in_operation("load", Some(id)));
        };

        let key = self.cache_key(id);
        let cached = cache
            .get(&key)
            .await
            .map_err(TesseraError::from)
            .map_err(self.in_operation("load", Some(id)))?;
        if let Some(doc) = cached {
            return Ok(Some(doc));
        }

        debug!(collection = %self.scope.collection, id = %id, "load miss, find_one");
        let found = self
            .collection
            .find_one(&query, None)
            .await
            .map_err(self.in_operation("load", Some(id)))?;
        if let Some(doc) = &found {
            cache.set(&key, doc).await;
        }
        Ok(found)
    }

    /// Persist `doc`, returning the document as the store now holds it.
    ///
    /// A new document is inserted and gets its `_id` from the store. An
    /// existing one has every field except `_id` `$set` by an upserting
    /// find-and-modify, so fields absent from `doc` survive.
    pub async fn store(&self, doc: Document) -> TesseraResult<Option<Document>> {
        let stored = if is_new(&doc) {
            debug!(collection = %self.scope.collection, "store insert");
            let inserted = self
                .collection
                .insert(doc, WriteConcern::Acknowledged)
                .await
                .map_err(self.in_operation("store", None))?;
            Some(inserted)
        } else {
            let id = self.require_id(&doc)?;
            let fields: Document = doc
                .into_iter()
                .filter(|(k, _)| k != ID_FIELD)
                .collect();
            let mut update = Document::new();
            update.insert(ops::SET.to_string(), Value::Object(fields));

            debug!(collection = %self.scope.collection, id = %id, "store find_and_modify");
            self.collection
                .find_and_modify(
                    &id_query(&id),
                    None,
                    &update,
                    FindAndModifyOptions::returning_new().with_upsert(true),
                )
                .await
                .map_err(self.in_operation("store", Some(&id)))?
        };

        if let (Some(cache), Some(doc)) = (&self.cache, &stored) {
            if let Some(id) = document_id(doc) {
                cache.set(&self.scope.key(id), doc).await;
            }
        }
        Ok(stored)
    }

    fn require_id(&self, doc: &Document) -> TesseraResult<DocumentId> {
        document_id(doc).ok_or_else(|| {
            let value = doc.get(ID_FIELD).map(Value::to_string).unwrap_or_default();
            TesseraError::from(ValidationError::InvalidIdentifier {
                value,
                reason: "_id must be an ObjectId, string or integer".to_string(),
            })
        })
    }

    /// Remove the document with `id`. Returns how many were removed (0 or 1)
    /// and drops the cache entry when one was.
    pub async fn destroy(&self, id: &DocumentId) -> TesseraResult<u64> {
        debug!(collection = %self.scope.collection, id = %id, "destroy remove");
        let removed = self
            .collection
            .remove(&id_query(id), RemoveOptions::default())
            .await
            .map_err(self.in_operation("destroy", Some(id)))?;
        if removed > 0 {
            if let Some(cache) = &self.cache {
                cache.delete(&self.cache_key(id)).await;
            }
        }
        Ok(removed)
    }

    // ========================================================================
    // SCANS
    // ========================================================================

    /// Stream every document of the collection.
    ///
    /// Documents arrive one at a time and each is written to the cache
    /// before it is yielded. A store error is yielded once and ends the
    /// stream; documents delivered before it stay cached.
    pub async fn all(&self, options: FindOptions) -> TesseraResult<DocumentStream> {
        debug!(collection = %self.scope.collection, "all find");
        let cursor = self
            .collection
            .find(&Document::new(), options)
            .await
            .map_err(self.in_operation("all", None))?;

        let cache = self.cache.clone();
        let scope = self.scope.clone();
        let scan = stream::unfold(Some(cursor), move |state| {
            let cache = cache.clone();
            let scope = scope.clone();
            async move {
                let mut cursor = state?;
                match cursor.next().await? {
                    Ok(doc) => {
                        if let (Some(cache), Some(id)) = (&cache, document_id(&doc)) {
                            cache.set(&scope.key(id), &doc).await;
                        }
                        Some((Ok(doc), Some(cursor)))
                    }
                    Err(e) => Some((Err(e.in_operation("all", scope.collection, None)), None)),
                }
            }
        });
        Ok(Box::pin(scan))
    }

    /// Drive [`all`](Self::all), handing each document to `visit`. Resolves
    /// with the number of documents delivered.
    pub async fn scan_all<F>(&self, options: FindOptions, mut visit: F) -> TesseraResult<u64>
    where
        F: FnMut(Document),
    {
        let mut scan = self.all(options).await?;
        let mut count = 0u64;
        while let Some(item) = scan.next().await {
            visit(item?);
            count += 1;
        }
        Ok(count)
    }

    // ========================================================================
    // SHARED MUTATION PATH
    // ========================================================================

    /// Apply `update` to the document with `id`.
    ///
    /// Without a cache this is a plain update and returns the store's
    /// matched count. With a cache it is a return-new find-and-modify whose
    /// result replaces the cache entry, and returns 1 or 0.
    async fn update(
        &self,
        operation: &'static str,
        id: &DocumentId,
        update: Document,
    ) -> TesseraResult<u64> {
        let query = id_query(id);
        if self.cache.is_none() {
            return self
                .collection
                .update(&query, &update, UpdateOptions::default())
                .await
                .map_err(self.in_operation(operation, Some(id)));
        }

        let modified = self
            .find_one_and_modify(&query, &update, FindAndModifyOptions::returning_new())
            .await
            .map_err(self.in_operation(operation, Some(id)))?;
        Ok(u64::from(modified.is_some()))
    }

    /// Find-and-modify that keeps the cache entry of the result current.
    ///
    /// A projected result is only a fragment of the document, so instead of
    /// being cached it invalidates the entry.
    async fn find_one_and_modify(
        &self,
        query: &Document,
        update: &Document,
        options: FindAndModifyOptions,
    ) -> TesseraResult<Option<Document>> {
        let projected = options.projection.is_some();
        let result = self
            .collection
            .find_and_modify(query, None, update, options)
            .await?;

        if let (Some(cache), Some(doc)) = (&self.cache, &result) {
            if let Some(id) = document_id(doc) {
                let key = self.scope.key(id);
                if projected {
                    cache.delete(&key).await;
                } else {
                    cache.set(&key, doc).await;
                }
            }
        }
        Ok(result)
    }
}

// ============================================================================
// TESTS
// ============================================================================
