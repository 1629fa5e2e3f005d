//! Reference resolution across collections and databases.

use std::fmt;
use std::sync::{Arc, Weak};

use tessera_core::{Document, DocumentId, Reference, ReferenceError, TesseraResult};
use tracing::debug;

use super::CacheAsideRepository;
use crate::context::ContextShared;

/// Where a reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    pub database: String,
    pub collection: String,
    pub id: DocumentId,
}

impl ReferenceTarget {
    /// Resolve `reference` against the referencing repository's location.
    ///
    /// An embedded reference names its own collection and database, each
    /// defaulting to the current one. A manual reference takes the caller's
    /// `collection`/`database` or, failing those, the current ones.
    pub fn resolve(
        reference: &Reference,
        current_database: &str,
        current_collection: &str,
        collection: Option<&str>,
        database: Option<&str>,
    ) -> TesseraResult<Self> {
        let (collection, database) = match reference {
            Reference::Embedded(_) => (reference.collection(), reference.database()),
            Reference::Manual(_) => (collection, database),
        };
        let id = DocumentId::from_value(reference.id_value()).ok_or_else(|| {
            ReferenceError::InvalidTarget {
                reason: format!("{} is not a document id", reference.id_value()),
            }
        })?;
        Ok(Self {
            database: database.unwrap_or(current_database).to_string(),
            collection: collection.unwrap_or(current_collection).to_string(),
            id,
        })
    }
}

/// Finds the repository behind a reference target.
///
/// Holds a weak handle on the owning context so repositories do not keep
/// their context alive.
#[derive(Clone, Default)]
pub struct ReferenceResolver {
    context: Weak<ContextShared>,
}

impl fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("attached", &(self.context.strong_count() > 0))
            .finish()
    }
}

impl ReferenceResolver {
    /// Resolver with no context: only same-collection references resolve.
    pub fn detached() -> Self {
        Self::default()
    }

    pub(crate) fn attached(context: Weak<ContextShared>) -> Self {
        Self { context }
    }

    /// Repository for `collection` in `database`.
    pub fn repository(
        &self,
        database: &str,
        collection: &str,
    ) -> TesseraResult<Arc<CacheAsideRepository>> {
        let context = self
            .context
            .upgrade()
            .ok_or(ReferenceError::ContextDropped)?;
        context.repository(database, collection)
    }
}

impl CacheAsideRepository {
    /// Follow the reference stored in `field` and load its target.
    ///
    /// `collection` and `database` locate manual references; embedded ones
    /// carry their own. `None` when the field is missing or the target
    /// document does not exist.
    pub async fn load_field(
        &self,
        id: &DocumentId,
        field: &str,
        collection: Option<&str>,
        database: Option<&str>,
    ) -> TesseraResult<Option<Document>> {
        let Some(value) = self.get_field(id, field).await? else {
            return Ok(None);
        };
        let reference = Reference::from_value(value);
        let target = ReferenceTarget::resolve(
            &reference,
            self.database_name(),
            self.name(),
            collection,
            database,
        )
        .map_err(self.in_operation("load_field", Some(id)))?;

        debug!(
            collection = %self.name(),
            id = %id,
            field,
            target_database = %target.database,
            target_collection = %target.collection,
            target_id = %target.id,
            "load_field"
        );
        if target.database == self.database_name() && target.collection == self.name() {
            return self.load(&target.id).await;
        }
        let repository = self
            .resolver
            .repository(&target.database, &target.collection)
            .map_err(self.in_operation("load_field", Some(id)))?;
        repository.load(&target.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{doc, uncached_repository};
    use super::*;
    use tessera_core::{json, DbRef, TesseraError};

    #[test]
    fn test_manual_target_uses_caller_location() {
        let r = Reference::from_value(json!("u1"));
        let t = ReferenceTarget::resolve(&r, "app", "posts", Some("users"), None).unwrap();
        assert_eq!(t.database, "app");
        assert_eq!(t.collection, "users");
        assert_eq!(t.id, DocumentId::from("u1"));
    }

    #[test]
    fn test_embedded_target_ignores_caller_location() {
        let dbref = DbRef::new("users", &DocumentId::Int(3)).with_database("accounts");
        let r = Reference::from_value(dbref.to_value());
        let t = ReferenceTarget::resolve(&r, "app", "posts", Some("other"), Some("x")).unwrap();
        assert_eq!(t.database, "accounts");
        assert_eq!(t.collection, "users");
        assert_eq!(t.id, DocumentId::Int(3));
    }

    #[test]
    fn test_embedded_target_defaults_missing_parts() {
        let r = Reference::from_value(json!({"$id": "x"}));
        let t = ReferenceTarget::resolve(&r, "app", "posts", None, None).unwrap();
        assert_eq!((t.database.as_str(), t.collection.as_str()), ("app", "posts"));
    }

    #[test]
    fn test_unusable_target_id() {
        let r = Reference::from_value(json!([1, 2]));
        let err = ReferenceTarget::resolve(&r, "app", "posts", None, None).unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Reference(ReferenceError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_same_collection_resolves_without_context() {
        let repo = uncached_repository();
        repo.store(doc(json!({"_id": "parent", "name": "p"}))).await.unwrap();
        repo.store(doc(json!({"_id": "child", "parent": "parent"})))
            .await
            .unwrap();

        let loaded = repo
            .load_field(&DocumentId::from("child"), "parent", None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.get("name"), Some(&json!("p")));

        assert!(repo
            .load_field(&DocumentId::from("child"), "missing", None, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_other_collection_without_context_fails() {
        let repo = uncached_repository();
        repo.store(doc(json!({"_id": "post", "author": "u1"})))
            .await
            .unwrap();
        let err = repo
            .load_field(&DocumentId::from("post"), "author", Some("authors"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            TesseraError::Reference(ReferenceError::ContextDropped)
        ));
    }
}
