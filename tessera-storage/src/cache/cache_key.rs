//! Cache keys scoped to a namespace, database and collection.
//!
//! A `CacheKey` can only be built from all four parts, so two collections
//! (or two databases with a same-named collection) never share an entry.
//! Separators inside the namespace, database and collection are escaped, so
//! `app` + `user_logs` and `app_user` + `logs` encode differently.

use std::borrow::Cow;
use std::fmt;

use tessera_core::DocumentId;

/// Separator between key components.
const SEPARATOR: char = '_';

/// `%` and the separator, percent-encoded. Names without either are
/// written unchanged.
fn escape(component: &str) -> Cow<'_, str> {
    if !component.contains(['%', SEPARATOR]) {
        return Cow::Borrowed(component);
    }
    let mut out = String::with_capacity(component.len() + 4);
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            SEPARATOR => out.push_str("%5F"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Key of one cached document: `<namespace>_<database>_<collection>_<id>`.
///
/// The ID is the last component and is written verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data, so keys cannot be assembled piecemeal.
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    namespace: String,
    database: String,
    collection: String,
    id: DocumentId,
}

impl CacheKey {
    pub fn new(
        namespace: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
        id: DocumentId,
    ) -> Self {
        Self {
            inner: CacheKeyInner {
                namespace: namespace.into(),
                database: database.into(),
                collection: collection.into(),
                id,
            },
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    pub fn id(&self) -> &DocumentId {
        &self.inner.id
    }

    /// The key as the string handed to the backend.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ns}{sep}{db}{sep}{coll}{sep}{id}",
            ns = escape(&self.inner.namespace),
            db = escape(&self.inner.database),
            coll = escape(&self.inner.collection),
            id = self.inner.id,
            sep = SEPARATOR,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ObjectId;

    #[test]
    fn test_key_format() {
        let key = CacheKey::new("tessera", "app", "users", DocumentId::from("alice"));
        assert_eq!(key.encode(), "tessera_app_users_alice");

        let key = CacheKey::new("tessera", "app", "users", DocumentId::Int(42));
        assert_eq!(key.encode(), "tessera_app_users_42");
    }

    #[test]
    fn test_object_id_renders_as_hex() {
        let oid = ObjectId::new();
        let key = CacheKey::new("ns", "db", "c", DocumentId::ObjectId(oid));
        assert_eq!(key.encode(), format!("ns_db_c_{}", oid.to_hex()));
        assert_eq!(key.id(), &DocumentId::ObjectId(oid));
    }

    #[test]
    fn test_keys_differ_by_collection_and_database() {
        let id = DocumentId::Int(1);
        let a = CacheKey::new("ns", "db", "users", id.clone());
        let b = CacheKey::new("ns", "db", "posts", id.clone());
        let c = CacheKey::new("ns", "other", "users", id);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.collection(), "users");
        assert_eq!(c.database(), "other");
        assert_eq!(a.namespace(), "ns");
    }

    #[test]
    fn test_underscored_names_do_not_collide() {
        let id = DocumentId::from("k");
        let a = CacheKey::new("tessera", "app", "user_logs", id.clone());
        let b = CacheKey::new("tessera", "app_user", "logs", id);
        assert_ne!(a.encode(), b.encode());
        assert_eq!(a.encode(), "tessera_app_user%5Flogs_k");
        assert_eq!(b.encode(), "tessera_app%5Fuser_logs_k");

        let pct = CacheKey::new("ns", "a%5Fb", "c", DocumentId::Int(1));
        let under = CacheKey::new("ns", "a_b", "c", DocumentId::Int(1));
        assert_ne!(pct.encode(), under.encode());
    }

    #[test]
    fn test_id_with_separator_is_verbatim() {
        let key = CacheKey::new("ns", "db", "c", DocumentId::from("a_b"));
        assert_eq!(key.encode(), "ns_db_c_a_b");
    }

    #[test]
    fn test_string_and_int_ids_share_a_suffix() {
        let text = CacheKey::new("ns", "db", "c", DocumentId::from("1"));
        let int = CacheKey::new("ns", "db", "c", DocumentId::Int(1));
        assert_ne!(text, int);
        assert_eq!(text.encode(), int.encode());
    }
}
