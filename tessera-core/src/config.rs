//! Configuration types
//!
//! Configuration is one explicit structure with named optional fields. The
//! shorthand forms (a bare URL, a list of collection names) are separate
//! constructors rather than alternative shapes of the same input.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::ConfigError;

/// Default cache key namespace.
pub const DEFAULT_NAMESPACE: &str = "tessera";

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

// ============================================================================
// REPOSITORY CONFIGURATION
// ============================================================================

type DefaultsFn = dyn Fn() -> Document + Send + Sync;

/// Per-collection repository configuration.
#[derive(Clone)]
pub struct RepositoryConfig {
    defaults: Arc<DefaultsFn>,
}

impl RepositoryConfig {
    /// Configuration whose defaults come from a factory.
    pub fn new<F>(defaults: F) -> Self
    where
        F: Fn() -> Document + Send + Sync + 'static,
    {
        Self {
            defaults: Arc::new(defaults),
        }
    }

    /// Shorthand: every new document starts from a copy of `defaults`.
    pub fn with_defaults(defaults: Document) -> Self {
        Self::new(move || defaults.clone())
    }

    /// Fresh field defaults for a new document.
    pub fn defaults(&self) -> Document {
        (self.defaults)()
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::new(Document::new)
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("defaults", &self.defaults())
            .finish()
    }
}

// ============================================================================
// DATABASE AND CACHE CONFIGURATION
// ============================================================================

/// One database to attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name, also the registry lookup key.
    pub name: String,
    /// Connection URL handed to the connector. `None` lets the connector
    /// decide (the in-memory connector ignores it).
    #[serde(default)]
    pub url: Option<String>,
    /// Collections registered up front.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Whether to register every collection the database reports.
    #[serde(default = "default_auto_discover")]
    pub auto_discover: bool,
}

fn default_auto_discover() -> bool {
    true
}

impl DatabaseConfig {
    /// Database with discovery on and nothing registered up front.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            collections: Vec::new(),
            auto_discover: true,
        }
    }

    /// Shorthand: database with an explicit list of collections.
    pub fn with_collections<I, S>(name: impl Into<String>, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collections: collections.into_iter().map(Into::into).collect(),
            ..Self::new(name)
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn without_discovery(mut self) -> Self {
        self.auto_discover = false;
        self
    }
}

/// Which cache provider to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheSettings {
    /// No cache: every read goes to the store.
    #[default]
    None,
    /// In-process map.
    Memory,
    /// On-disk LMDB environment.
    Lmdb {
        path: PathBuf,
        #[serde(default = "default_lmdb_size")]
        max_size_mb: usize,
    },
    /// Remote Redis server.
    Redis { url: String },
}

fn default_lmdb_size() -> usize {
    DEFAULT_LMDB_MAX_SIZE_MB
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TesseraConfig {
    /// First component of every cache key.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            cache: CacheSettings::None,
            databases: Vec::new(),
        }
    }
}

impl TesseraConfig {
    /// Shorthand: a single auto-discovered database.
    ///
    /// Accepts either a bare name or a URL whose last path segment is the
    /// database name (`mongodb://host:27017/app`).
    pub fn single_database(url_or_name: &str) -> Self {
        let config = match database_name_from_url(url_or_name) {
            Some(name) => DatabaseConfig::new(name).with_url(url_or_name),
            None => DatabaseConfig::new(url_or_name),
        };
        Self {
            databases: vec![config],
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.databases.push(database);
        self
    }

    /// Parse from TOML.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Build from environment variables.
    ///
    /// Environment variables:
    /// - `TESSERA_NAMESPACE`: cache key namespace (default: tessera)
    /// - `TESSERA_CACHE`: none | memory | lmdb | redis (default: none)
    /// - `TESSERA_LMDB_PATH`: LMDB directory (required for lmdb)
    /// - `TESSERA_LMDB_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `TESSERA_REDIS_URL`: Redis URL (required for redis)
    /// - `TESSERA_DATABASES`: comma-separated `name` or `name=url` entries
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup, using the same keys as
    /// [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("TESSERA_NAMESPACE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_namespace);

        let cache_kind = lookup("TESSERA_CACHE")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "none".to_string());

        let cache = match cache_kind.as_str() {
            "" | "none" => CacheSettings::None,
            "memory" => CacheSettings::Memory,
            "lmdb" => {
                let path = lookup("TESSERA_LMDB_PATH").ok_or_else(|| {
                    ConfigError::MissingRequired {
                        field: "TESSERA_LMDB_PATH".to_string(),
                    }
                })?;
                let max_size_mb = match lookup("TESSERA_LMDB_MAX_SIZE_MB") {
                    Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                        field: "TESSERA_LMDB_MAX_SIZE_MB".to_string(),
                        value: raw.clone(),
                        reason: "expected a whole number of megabytes".to_string(),
                    })?,
                    None => DEFAULT_LMDB_MAX_SIZE_MB,
                };
                CacheSettings::Lmdb {
                    path: PathBuf::from(path),
                    max_size_mb,
                }
            }
            "redis" => {
                let url = lookup("TESSERA_REDIS_URL").ok_or_else(|| {
                    ConfigError::MissingRequired {
                        field: "TESSERA_REDIS_URL".to_string(),
                    }
                })?;
                CacheSettings::Redis { url }
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "TESSERA_CACHE".to_string(),
                    value: other.to_string(),
                    reason: "expected none, memory, lmdb or redis".to_string(),
                })
            }
        };

        let databases = lookup("TESSERA_DATABASES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(|entry| match entry.split_once('=') {
                        Some((name, url)) => DatabaseConfig::new(name.trim()).with_url(url.trim()),
                        None => DatabaseConfig::new(entry),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            namespace,
            cache,
            databases,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce valid cache keys or caches.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "namespace".to_string(),
            });
        }
        for db in &self.databases {
            if db.name.is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: "databases.name".to_string(),
                });
            }
            if let Some(empty) = db.collections.iter().find(|c| c.is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("databases.{}.collections", db.name),
                    value: empty.clone(),
                    reason: "collection names must not be empty".to_string(),
                });
            }
        }
        if let CacheSettings::Lmdb { max_size_mb: 0, .. } = self.cache {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "LMDB map size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Database name from the last path segment of a URL, ignoring any query
/// string. `None` when the input is not a URL or has no path.
fn database_name_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let (_, path) = rest.split_once('/')?;
    let name = path.split('?').next().unwrap_or_default();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
