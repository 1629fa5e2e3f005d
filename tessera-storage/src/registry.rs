//! Per-database registry of repositories.
//!
//! Collections are registered by name, explicitly or by discovery. A
//! repository is built the first time its name is requested and the same
//! instance is handed out from then on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use once_cell::sync::Lazy;
use regex::Regex;
use tessera_core::{ReferenceError, RepositoryConfig, StorageError, TesseraResult};
use tracing::{debug, info};

use crate::cache::CacheProvider;
use crate::context::ContextShared;
use crate::repository::{CacheAsideRepository, ReferenceResolver};
use crate::store::DocumentDatabase;

/// `<database>.<collection>` as stores list qualified names. Names with
/// further dots (`db.system.indexes`) do not match.
static QUALIFIED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+\.(\w+)$").expect("Invalid qualified name regex"));

static PLAIN_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").expect("Invalid plain name regex"));

/// Collection name a raw listing entry registers under, if any.
fn discovered_name(raw: &str) -> Option<&str> {
    if PLAIN_NAME.is_match(raw) {
        return Some(raw);
    }
    QUALIFIED_NAME
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Lazily built, memoised repositories for one database.
pub struct RepositoryRegistry {
    database: Arc<dyn DocumentDatabase>,
    cache: Option<Arc<dyn CacheProvider>>,
    namespace: String,
    context: Weak<ContextShared>,
    configs: RwLock<HashMap<String, RepositoryConfig>>,
    repositories: RwLock<HashMap<String, Arc<CacheAsideRepository>>>,
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("database", &self.database.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl RepositoryRegistry {
    /// Standalone registry. Its repositories resolve only same-collection
    /// references.
    pub fn new(
        database: Arc<dyn DocumentDatabase>,
        cache: Option<Arc<dyn CacheProvider>>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            database,
            cache,
            namespace: namespace.into(),
            context: Weak::new(),
            configs: RwLock::new(HashMap::new()),
            repositories: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn with_context(mut self, context: Weak<ContextShared>) -> Self {
        self.context = context;
        self
    }

    pub fn database(&self) -> &Arc<dyn DocumentDatabase> {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// Register `name` with `config`. Re-registering replaces the config for
    /// repositories not built yet.
    pub fn register(&self, name: impl Into<String>, config: RepositoryConfig) -> TesseraResult<()> {
        let name = name.into();
        debug!(database = %self.database_name(), collection = %name, "register collection");
        self.configs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(name, config);
        Ok(())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.configs
            .read()
            .map(|c| c.contains_key(name))
            .unwrap_or(false)
    }

    /// Registered collection names, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .configs
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Register every collection the database lists that is not registered
    /// yet, with the default config. Returns the newly registered names.
    pub async fn discover(&self) -> TesseraResult<Vec<String>> {
        let raw_names = self.database.collection_names().await?;
        let mut added = Vec::new();
        {
            let mut configs = self.configs.write().map_err(|_| StorageError::LockPoisoned)?;
            for raw in &raw_names {
                let Some(name) = discovered_name(raw) else {
                    debug!(database = %self.database_name(), name = %raw, "skipping collection");
                    continue;
                };
                if !configs.contains_key(name) {
                    configs.insert(name.to_string(), RepositoryConfig::default());
                    added.push(name.to_string());
                }
            }
        }
        info!(
            database = %self.database_name(),
            discovered = added.len(),
            collections = ?self.collection_names(),
            "available collections"
        );
        Ok(added)
    }

    /// Repository for `name`, built on first request.
    pub fn repository(&self, name: &str) -> TesseraResult<Arc<CacheAsideRepository>> {
        if let Some(existing) = self
            .repositories
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(name)
        {
            return Ok(Arc::clone(existing));
        }

        let config = self
            .configs
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| ReferenceError::UnknownCollection {
                database: self.database_name().to_string(),
                collection: name.to_string(),
            })?;

        let mut repositories = self
            .repositories
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let repository = repositories.entry(name.to_string()).or_insert_with(|| {
            debug!(database = %self.database.name(), collection = %name, "building repository");
            Arc::new(
                CacheAsideRepository::new(
                    self.database.collection(name),
                    config,
                    self.cache.clone(),
                    self.namespace.clone(),
                )
                .with_resolver(ReferenceResolver::attached(self.context.clone())),
            )
        });
        Ok(Arc::clone(repository))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDatabase;
    use tessera_core::TesseraError;

    fn registry() -> (RepositoryRegistry, Arc<InMemoryDatabase>) {
        let db = Arc::new(InMemoryDatabase::new("app"));
        let registry = RepositoryRegistry::new(db.clone(), None, "tessera");
        (registry, db)
    }

    #[test]
    fn test_discovered_name() {
        assert_eq!(discovered_name("users"), Some("users"));
        assert_eq!(discovered_name("app.users"), Some("users"));
        assert_eq!(discovered_name("app.system.indexes"), None);
        assert_eq!(discovered_name("bad-name"), None);
    }

    #[test]
    fn test_repository_is_memoised() {
        let (registry, _db) = registry();
        registry.register("users", RepositoryConfig::default()).unwrap();
        let a = registry.repository("users").unwrap();
        let b = registry.repository("users").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "users");
        assert_eq!(a.database_name(), "app");
    }

    #[test]
    fn test_unknown_collection() {
        let (registry, _db) = registry();
        let err = registry.repository("ghosts").unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Reference(ReferenceError::UnknownCollection { .. })
        ));
    }

    #[tokio::test]
    async fn test_discover_keeps_configured_collections() {
        let (registry, db) = registry();
        db.in_memory_collection("users");
        db.in_memory_collection("posts");
        registry
            .register(
                "users",
                RepositoryConfig::with_defaults(
                    tessera_core::json!({"role": "user"})
                        .as_object()
                        .cloned()
                        .unwrap(),
                ),
            )
            .unwrap();

        let added = registry.discover().await.unwrap();
        assert_eq!(added, vec!["posts".to_string()]);
        assert_eq!(registry.collection_names(), vec!["posts", "users"]);

        let users = registry.repository("users").unwrap();
        assert_eq!(
            users.create_new(None).get("role"),
            Some(&tessera_core::json!("user"))
        );
        assert!(registry.discover().await.unwrap().is_empty());
    }
}
