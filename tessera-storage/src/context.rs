//! Process context: the shared cache provider and every attached database.
//!
//! A context is an explicit value handed to whoever needs it. Repositories
//! reach it for cross-database references through a weak handle, so dropping
//! the last `TesseraContext` releases everything.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tessera_core::{
    CacheError, CacheSettings, ConfigError, DatabaseConfig, ReferenceError, StorageError,
    TesseraConfig, TesseraError, TesseraResult,
};
use tracing::{info, warn};

use crate::cache::{CacheProvider, LmdbCache, MemoryCache};
use crate::registry::RepositoryRegistry;
use crate::repository::CacheAsideRepository;
use crate::store::{DatabaseConnector, DocumentDatabase};

/// State shared between a context and the resolvers of its repositories.
pub(crate) struct ContextShared {
    namespace: String,
    cache: Option<Arc<dyn CacheProvider>>,
    registries: RwLock<HashMap<String, Arc<RepositoryRegistry>>>,
}

impl ContextShared {
    fn registry(&self, database: &str) -> TesseraResult<Arc<RepositoryRegistry>> {
        self.registries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(database)
            .cloned()
            .ok_or_else(|| {
                ReferenceError::UnknownDatabase {
                    database: database.to_string(),
                }
                .into()
            })
    }

    pub(crate) fn repository(
        &self,
        database: &str,
        collection: &str,
    ) -> TesseraResult<Arc<CacheAsideRepository>> {
        self.registry(database)?.repository(collection)
    }
}

/// Entry point: owns the cache provider and one registry per database.
#[derive(Clone)]
pub struct TesseraContext {
    inner: Arc<ContextShared>,
}

impl std::fmt::Debug for TesseraContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TesseraContext")
            .field("namespace", &self.inner.namespace)
            .field("cache", &self.inner.cache.as_ref().map(|c| c.name()))
            .field("databases", &self.database_names())
            .finish()
    }
}

impl TesseraContext {
    /// Empty context. `cache: None` turns caching off for every repository.
    pub fn new(cache: Option<Arc<dyn CacheProvider>>, namespace: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ContextShared {
                namespace: namespace.into(),
                cache,
                registries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Build the cache from `config`, connect every configured database and
    /// attach it.
    pub async fn configure(
        config: &TesseraConfig,
        connector: &dyn DatabaseConnector,
    ) -> TesseraResult<Self> {
        config.validate()?;
        let cache = build_cache(&config.cache).await?;
        let context = Self::new(cache, config.namespace.clone());
        for database in &config.databases {
            let handle = connector.connect(database).await?;
            context.attach(handle, database).await?;
        }
        Ok(context)
    }

    /// Attach a connected database under `config.name`, registering its
    /// configured collections and, with `auto_discover`, every collection
    /// it lists.
    ///
    /// The handle must report the same name as `config`. Repositories key
    /// their cache entries and resolve references by the handle's name.
    pub async fn attach(
        &self,
        database: Arc<dyn DocumentDatabase>,
        config: &DatabaseConfig,
    ) -> TesseraResult<Arc<RepositoryRegistry>> {
        if database.name() != config.name {
            return Err(ConfigError::InvalidValue {
                field: "databases.name".to_string(),
                value: config.name.clone(),
                reason: format!("connected database is named {}", database.name()),
            }
            .into());
        }

        let registry = RepositoryRegistry::new(
            database,
            self.inner.cache.clone(),
            self.inner.namespace.clone(),
        )
        .with_context(Arc::downgrade(&self.inner));

        for name in &config.collections {
            registry.register(name.clone(), Default::default())?;
        }
        if config.auto_discover {
            registry.discover().await?;
        }

        let registry = Arc::new(registry);
        self.inner
            .registries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(config.name.clone(), Arc::clone(&registry));
        info!(database = %config.name, collections = ?registry.collection_names(), "database attached");
        Ok(registry)
    }

    /// Registry of an attached database.
    pub fn database(&self, name: &str) -> TesseraResult<Arc<RepositoryRegistry>> {
        self.inner.registry(name)
    }

    /// Names of attached databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .registries
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Repository for `collection` in `database`.
    pub fn repository(
        &self,
        database: &str,
        collection: &str,
    ) -> TesseraResult<Arc<CacheAsideRepository>> {
        self.inner.repository(database, collection)
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheProvider>> {
        self.inner.cache.as_ref()
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Flush and close the cache, then close every database. Every database
    /// is closed even if one fails; the first failure is returned.
    pub async fn close(&self) -> TesseraResult<()> {
        if let Some(cache) = &self.inner.cache {
            cache.close(true).await;
        }
        let registries: Vec<Arc<RepositoryRegistry>> = self
            .inner
            .registries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .values()
            .cloned()
            .collect();

        let mut first_error: Option<TesseraError> = None;
        for registry in registries {
            if let Err(e) = registry.database().close().await {
                warn!(database = %registry.database_name(), error = %e, "database close failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Cache provider described by `settings`.
pub async fn build_cache(
    settings: &CacheSettings,
) -> TesseraResult<Option<Arc<dyn CacheProvider>>> {
    let cache: Arc<dyn CacheProvider> = match settings {
        CacheSettings::None => return Ok(None),
        CacheSettings::Memory => Arc::new(MemoryCache::new()),
        CacheSettings::Lmdb { path, max_size_mb } => {
            Arc::new(LmdbCache::open(path, *max_size_mb).map_err(CacheError::from)?)
        }
        CacheSettings::Redis { url } => redis_cache(url).await?,
    };
    info!(provider = cache.name(), "cache enabled");
    Ok(Some(cache))
}

#[cfg(feature = "redis")]
async fn redis_cache(url: &str) -> TesseraResult<Arc<dyn CacheProvider>> {
    use crate::cache::{RedisClient, RemoteCache};
    let client = RedisClient::connect(url).await?;
    Ok(Arc::new(RemoteCache::new(client)))
}

#[cfg(not(feature = "redis"))]
async fn redis_cache(url: &str) -> TesseraResult<Arc<dyn CacheProvider>> {
    Err(ConfigError::InvalidValue {
        field: "cache.kind".to_string(),
        value: format!("redis ({})", url),
        reason: "built without the redis feature".to_string(),
    }
    .into())
}
