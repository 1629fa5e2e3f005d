//! In-memory document store.
//!
//! Implements the store binding over plain maps. Every operation on a
//! collection runs under that collection's single lock, which gives each
//! primitive the same all-or-nothing atomicity a real store gives one
//! operation (concurrent `$inc`s never lose an update).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::stream;
use serde_json::Value;
use tessera_core::{
    document_id, is_new, ops, DatabaseConfig, Document, DocumentId, StorageError, TesseraResult,
    ID_FIELD,
};
use tracing::trace;

use super::options::{
    FindAndModifyOptions, FindOptions, IndexInfo, IndexOptions, RemoveOptions, UpdateOptions,
    WriteConcern,
};
use super::query::{compare_by, equality_fields, index_key, matches, project, same_index_key};
use super::traits::{DatabaseConnector, DocumentCollection, DocumentDatabase, DocumentStream};
use super::update::{apply_update, ApplyMode};

/// Name of the implicit identity index.
pub const ID_INDEX: &str = "_id_";

#[derive(Debug, Default)]
struct CollectionState {
    /// Documents in insertion order.
    docs: Vec<Document>,
    /// Secondary indexes by name.
    indexes: Vec<IndexInfo>,
}

impl CollectionState {
    fn position(&self, query: &Document, sort: Option<&Document>) -> Result<Option<usize>, StorageError> {
        let mut best: Option<usize> = None;
        for (i, doc) in self.docs.iter().enumerate() {
            if !matches(doc, query)? {
                continue;
            }
            match (sort, best) {
                (None, _) => return Ok(Some(i)),
                (Some(_), None) => best = Some(i),
                (Some(sort), Some(j)) => {
                    if compare_by(sort, doc, &self.docs[j]).is_lt() {
                        best = Some(i);
                    }
                }
            }
        }
        Ok(best)
    }

    /// Reject `candidate` if it collides with another document on `_id` or
    /// on any unique index. `skip` is the candidate's own slot when updating.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> Result<(), StorageError> {
        let mut id_keys = Document::new();
        id_keys.insert(ID_FIELD.to_string(), Value::from(1));
        let id_index = IndexInfo {
            name: ID_INDEX.to_string(),
            keys: id_keys,
            unique: true,
        };
        let unique = std::iter::once(&id_index).chain(self.indexes.iter().filter(|i| i.unique));

        for index in unique {
            let clash = self
                .docs
                .iter()
                .enumerate()
                .any(|(i, other)| Some(i) != skip && same_index_key(candidate, other, &index.keys));
            if clash {
                return Err(StorageError::DuplicateKey {
                    collection: collection.to_string(),
                    index: index.name.clone(),
                    key: index_key(candidate, &index.keys),
                });
            }
        }
        Ok(())
    }
}

/// One collection held in memory.
#[derive(Debug)]
pub struct InMemoryCollection {
    name: String,
    database: String,
    state: RwLock<CollectionState>,
}

impl InMemoryCollection {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            state: RwLock::new(CollectionState::default()),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, CollectionState>, StorageError> {
        self.state.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, CollectionState>, StorageError> {
        self.state.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Build the document an upsert inserts: the query's equality fields
    /// with the update applied on top.
    fn upsert_document(query: &Document, update: &Document) -> Result<Document, StorageError> {
        let mut doc = Document::new();
        let replacement = !update.keys().any(|k| k.starts_with('$'));
        if !replacement {
            for (path, value) in equality_fields(query) {
                let mut seed = Document::new();
                let mut fields = Document::new();
                fields.insert(path.to_string(), value);
                seed.insert(ops::SET_ON_INSERT.to_string(), Value::Object(fields));
                apply_update(&mut doc, &seed, ApplyMode::Inserting)?;
            }
        } else if let Some(id) = query.get(ID_FIELD) {
            doc.insert(ID_FIELD.to_string(), id.clone());
        }
        apply_update(&mut doc, update, ApplyMode::Inserting)?;
        if is_new(&doc) {
            doc.insert(ID_FIELD.to_string(), DocumentId::generate().to_value());
        }
        Ok(doc)
    }
}

#[async_trait]
impl DocumentCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn find_one(
        &self,
        query: &Document,
        projection: Option<&Document>,
    ) -> TesseraResult<Option<Document>> {
        let state = self.read()?;
        let found = state
            .position(query, None)?
            .map(|i| project(&state.docs[i], projection));
        Ok(found)
    }

    async fn find(&self, query: &Document, options: FindOptions) -> TesseraResult<DocumentStream> {
        let mut found = {
            let state = self.read()?;
            let mut found = Vec::new();
            for doc in &state.docs {
                if matches(doc, query)? {
                    found.push(doc.clone());
                }
            }
            found
        };
        if let Some(sort) = &options.sort {
            found.sort_by(|a, b| compare_by(sort, a, b));
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let projection = options.projection;

        trace!(collection = %self.name, matched = found.len(), "find cursor opened");
        let docs: Vec<TesseraResult<Document>> = found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| Ok(project(&doc, projection.as_ref())))
            .collect();
        Ok(Box::pin(stream::iter(docs)))
    }

    async fn count(&self, query: &Document) -> TesseraResult<u64> {
        let state = self.read()?;
        let mut n = 0u64;
        for doc in &state.docs {
            if matches(doc, query)? {
                n += 1;
            }
        }
        Ok(n)
    }

    async fn insert(&self, mut doc: Document, _write_concern: WriteConcern) -> TesseraResult<Document> {
        if is_new(&doc) {
            doc.insert(ID_FIELD.to_string(), DocumentId::generate().to_value());
        } else if document_id(&doc).is_none() {
            return Err(StorageError::InsertFailed {
                collection: self.name.clone(),
                reason: "_id must be an ObjectId, string or integer".to_string(),
            }
            .into());
        }
        let mut state = self.write()?;
        state.check_unique(&self.name, &doc, None)?;
        state.docs.push(doc.clone());
        Ok(doc)
    }

    async fn find_and_modify(
        &self,
        query: &Document,
        sort: Option<&Document>,
        update: &Document,
        options: FindAndModifyOptions,
    ) -> TesseraResult<Option<Document>> {
        let mut state = self.write()?;
        match state.position(query, sort)? {
            Some(i) => {
                let before = state.docs[i].clone();
                let mut after = before.clone();
                apply_update(&mut after, update, ApplyMode::Existing)?;
                state.check_unique(&self.name, &after, Some(i))?;
                state.docs[i] = after.clone();
                let result = if options.return_new { after } else { before };
                Ok(Some(project(&result, options.projection.as_ref())))
            }
            None if options.upsert => {
                let doc = Self::upsert_document(query, update)?;
                state.check_unique(&self.name, &doc, None)?;
                state.docs.push(doc.clone());
                if options.return_new {
                    Ok(Some(project(&doc, options.projection.as_ref())))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> TesseraResult<u64> {
        let mut state = self.write()?;
        let mut targets = Vec::new();
        for (i, doc) in state.docs.iter().enumerate() {
            if matches(doc, query)? {
                targets.push(i);
                if !options.multi {
                    break;
                }
            }
        }

        if targets.is_empty() {
            if options.upsert {
                let doc = Self::upsert_document(query, update)?;
                state.check_unique(&self.name, &doc, None)?;
                state.docs.push(doc);
            }
            return Ok(0);
        }

        // Compute every new version first so a failure leaves nothing half
        // applied.
        let mut updated = Vec::with_capacity(targets.len());
        for &i in &targets {
            let mut doc = state.docs[i].clone();
            apply_update(&mut doc, update, ApplyMode::Existing)?;
            state.check_unique(&self.name, &doc, Some(i))?;
            updated.push((i, doc));
        }
        for (i, doc) in updated {
            state.docs[i] = doc;
        }
        Ok(targets.len() as u64)
    }

    async fn remove(&self, query: &Document, options: RemoveOptions) -> TesseraResult<u64> {
        let mut state = self.write()?;
        let mut removed = 0u64;
        let mut i = 0;
        while i < state.docs.len() {
            if matches(&state.docs[i], query)? {
                state.docs.remove(i);
                removed += 1;
                if options.just_one {
                    break;
                }
            } else {
                i += 1;
            }
        }
        Ok(removed)
    }

    async fn create_index(&self, keys: &Document, options: IndexOptions) -> TesseraResult<String> {
        if keys.is_empty() {
            return Err(StorageError::InvalidQuery {
                reason: "index needs at least one key".to_string(),
            }
            .into());
        }
        let name = options.name.unwrap_or_else(|| {
            keys.iter()
                .map(|(field, dir)| format!("{}_{}", field, dir))
                .collect::<Vec<_>>()
                .join("_")
        });

        let mut state = self.write()?;
        if state.indexes.iter().any(|i| i.name == name) || name == ID_INDEX {
            return Ok(name);
        }
        if options.unique {
            for (i, a) in state.docs.iter().enumerate() {
                if let Some(b) = state.docs[i + 1..]
                    .iter()
                    .find(|b| same_index_key(a, b, keys))
                {
                    return Err(StorageError::DuplicateKey {
                        collection: self.name.clone(),
                        index: name,
                        key: index_key(b, keys),
                    }
                    .into());
                }
            }
        }
        state.indexes.push(IndexInfo {
            name: name.clone(),
            keys: keys.clone(),
            unique: options.unique,
        });
        Ok(name)
    }

    async fn drop_index(&self, name: &str) -> TesseraResult<bool> {
        let mut state = self.write()?;
        let before = state.indexes.len();
        state.indexes.retain(|i| i.name != name);
        Ok(state.indexes.len() != before)
    }

    async fn index_information(&self) -> TesseraResult<Vec<IndexInfo>> {
        let state = self.read()?;
        let mut keys = Document::new();
        keys.insert(ID_FIELD.to_string(), Value::from(1));
        let mut out = vec![IndexInfo {
            name: ID_INDEX.to_string(),
            keys,
            unique: true,
        }];
        out.extend(state.indexes.iter().cloned());
        Ok(out)
    }
}

/// A database of in-memory collections.
///
/// Collections spring into existence the first time they are handed out,
/// and are listed as `<database>.<collection>`, the qualified form stores
/// commonly report.
#[derive(Debug)]
pub struct InMemoryDatabase {
    name: String,
    collections: RwLock<HashMap<String, Arc<InMemoryCollection>>>,
}

impl InMemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Typed handle to a collection, created on first use.
    pub fn in_memory_collection(&self, name: &str) -> Arc<InMemoryCollection> {
        if let Ok(collections) = self.collections.read() {
            if let Some(existing) = collections.get(name) {
                return Arc::clone(existing);
            }
        }
        let mut collections = match self.collections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(InMemoryCollection::new(&self.name, name))),
        )
    }
}

#[async_trait]
impl DocumentDatabase for InMemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collection_names(&self) -> TesseraResult<Vec<String>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut names: Vec<String> = collections
            .keys()
            .map(|c| format!("{}.{}", self.name, c))
            .collect();
        names.sort();
        Ok(names)
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        self.in_memory_collection(name)
    }

    async fn close(&self) -> TesseraResult<()> {
        Ok(())
    }
}

/// Connector that hands out one shared in-memory database per name.
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    databases: RwLock<HashMap<String, Arc<InMemoryDatabase>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The database a later `connect` for `name` will return.
    pub fn database(&self, name: &str) -> Arc<InMemoryDatabase> {
        let mut databases = match self.databases.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(InMemoryDatabase::new(name))),
        )
    }
}

#[async_trait]
impl DatabaseConnector for InMemoryConnector {
    async fn connect(&self, config: &DatabaseConfig) -> TesseraResult<Arc<dyn DocumentDatabase>> {
        Ok(self.database(&config.name))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use tessera_core::TesseraError;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    fn collection() -> InMemoryCollection {
        InMemoryCollection::new("test", "items")
    }

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let c = collection();
        let stored = c
            .insert(doc(json!({"name": "a"})), WriteConcern::default())
            .await
            .unwrap();
        assert!(matches!(document_id(&stored), Some(DocumentId::ObjectId(_))));
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_id_fails() {
        let c = collection();
        c.insert(doc(json!({"_id": 1})), WriteConcern::default())
            .await
            .unwrap();
        let err = c
            .insert(doc(json!({"_id": 1})), WriteConcern::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Storage(StorageError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_one_with_projection() {
        let c = collection();
        c.insert(doc(json!({"_id": 1, "a": 1, "b": 2})), WriteConcern::default())
            .await
            .unwrap();
        let found = c
            .find_one(&doc(json!({"_id": 1})), Some(&doc(json!({"b": 1}))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(found), json!({"_id": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit() {
        let c = collection();
        for n in [3, 1, 2, 5, 4] {
            c.insert(doc(json!({"_id": n, "n": n})), WriteConcern::default())
                .await
                .unwrap();
        }
        let options = FindOptions::new()
            .with_sort(doc(json!({"n": -1})))
            .with_skip(1)
            .with_limit(2);
        let found: Vec<_> = c.find(&Document::new(), options).await.unwrap().collect().await;
        let ns: Vec<Value> = found
            .into_iter()
            .map(|r| r.unwrap().get("n").cloned().unwrap())
            .collect();
        assert_eq!(ns, vec![json!(4), json!(3)]);
    }

    #[tokio::test]
    async fn test_find_and_modify_returns_new_or_old() {
        let c = collection();
        c.insert(doc(json!({"_id": 1, "n": 1})), WriteConcern::default())
            .await
            .unwrap();
        let update = doc(json!({"$inc": {"n": 1}}));

        let old = c
            .find_and_modify(&doc(json!({"_id": 1})), None, &update, FindAndModifyOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.get("n"), Some(&json!(1)));

        let new = c
            .find_and_modify(
                &doc(json!({"_id": 1})),
                None,
                &update,
                FindAndModifyOptions::returning_new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new.get("n"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_find_and_modify_upsert_seeds_from_query() {
        let c = collection();
        let result = c
            .find_and_modify(
                &doc(json!({"_id": "u1"})),
                None,
                &doc(json!({"$set": {"name": "x"}})),
                FindAndModifyOptions::returning_new().with_upsert(true),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(result), json!({"_id": "u1", "name": "x"}));
    }

    #[tokio::test]
    async fn test_find_and_modify_without_match_returns_none() {
        let c = collection();
        let result = c
            .find_and_modify(
                &doc(json!({"_id": "nope"})),
                None,
                &doc(json!({"$set": {"a": 1}})),
                FindAndModifyOptions::returning_new(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_find_and_modify_sort_picks_first() {
        let c = collection();
        for n in [2, 1, 3] {
            c.insert(doc(json!({"_id": n, "n": n, "k": "x"})), WriteConcern::default())
                .await
                .unwrap();
        }
        let touched = c
            .find_and_modify(
                &doc(json!({"k": "x"})),
                Some(&doc(json!({"n": 1}))),
                &doc(json!({"$set": {"picked": true}})),
                FindAndModifyOptions::returning_new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(touched.get("_id"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_update_multi_and_failed_update_is_atomic() {
        let c = collection();
        c.insert(doc(json!({"_id": 1, "k": 1, "v": 1})), WriteConcern::default())
            .await
            .unwrap();
        c.insert(doc(json!({"_id": 2, "k": 1, "v": "s"})), WriteConcern::default())
            .await
            .unwrap();

        let multi = UpdateOptions {
            multi: true,
            ..Default::default()
        };
        let err = c
            .update(&doc(json!({"k": 1})), &doc(json!({"$inc": {"v": 1}})), multi.clone())
            .await;
        assert!(err.is_err());
        let first = c.find_one(&doc(json!({"_id": 1})), None).await.unwrap().unwrap();
        assert_eq!(first.get("v"), Some(&json!(1)));

        let n = c
            .update(&doc(json!({"k": 1})), &doc(json!({"$set": {"v": 0}})), multi)
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_update_reports_zero_when_unmatched() {
        let c = collection();
        let n = c
            .update(
                &doc(json!({"_id": 9})),
                &doc(json!({"$set": {"a": 1}})),
                UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_remove_just_one() {
        let c = collection();
        for n in 0..3 {
            c.insert(doc(json!({"_id": n, "k": 1})), WriteConcern::default())
                .await
                .unwrap();
        }
        let removed = c
            .remove(&doc(json!({"k": 1})), RemoveOptions::default())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let removed = c
            .remove(
                &doc(json!({"k": 1})),
                RemoveOptions {
                    just_one: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_unique_index_enforced() {
        let c = collection();
        let name = c
            .create_index(
                &doc(json!({"email": 1})),
                IndexOptions {
                    unique: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(name, "email_1");

        c.insert(doc(json!({"email": "a@x"})), WriteConcern::default())
            .await
            .unwrap();
        let err = c
            .insert(doc(json!({"email": "a@x"})), WriteConcern::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            TesseraError::Storage(StorageError::DuplicateKey { .. })
        ));

        let info = c.index_information().await.unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, ID_INDEX);

        assert!(c.drop_index("email_1").await.unwrap());
        assert!(!c.drop_index("email_1").await.unwrap());
        c.insert(doc(json!({"email": "a@x"})), WriteConcern::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_database_lists_qualified_names() {
        let db = InMemoryDatabase::new("app");
        db.in_memory_collection("users");
        db.in_memory_collection("posts");
        assert_eq!(
            db.collection_names().await.unwrap(),
            vec!["app.posts".to_string(), "app.users".to_string()]
        );
        assert!(Arc::ptr_eq(
            &db.in_memory_collection("users"),
            &db.in_memory_collection("users")
        ));
    }

    #[tokio::test]
    async fn test_connector_shares_databases() {
        let connector = InMemoryConnector::new();
        let seeded = connector.database("app");
        seeded.in_memory_collection("users");
        let db = connector.connect(&DatabaseConfig::new("app")).await.unwrap();
        assert_eq!(db.collection_names().await.unwrap(), vec!["app.users".to_string()]);
    }
}
