//! Error types for Tessera operations

use thiserror::Error;

/// Backing document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Invalid update on path {path}: {reason}")]
    InvalidUpdate { path: String, reason: String },

    #[error("Duplicate key in {collection} for index {index}: {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    #[error("Insert failed for {collection}: {reason}")]
    InsertFailed { collection: String, reason: String },

    #[error("Cursor failed on {collection}: {reason}")]
    Cursor { collection: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache provider errors.
///
/// Only reads surface these to callers; failed writes and deletes are logged
/// by the provider and swallowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache connection failed: {reason}")]
    Connection { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization error: {0}")]
    Serialization(String),

    #[error("Cache deserialization error: {0}")]
    Deserialization(String),
}

/// Reference resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Unknown database: {database}")]
    UnknownDatabase { database: String },

    #[error("Unknown collection {collection} in database {database}")]
    UnknownCollection { database: String, collection: String },

    #[error("Repository context is no longer available")]
    ContextDropped,

    #[error("Invalid reference target: {reason}")]
    InvalidTarget { reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid identifier {value}: {reason}")]
    InvalidIdentifier { value: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Tessera errors.
#[derive(Debug, Clone, Error)]
pub enum TesseraError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Reference error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Failure of a repository operation, tagged with where it happened.
    #[error("{operation} on {collection}{} failed: {source}", .id.as_ref().map(|id| format!(" (id {id})")).unwrap_or_default())]
    Operation {
        operation: &'static str,
        collection: String,
        id: Option<String>,
        source: Box<TesseraError>,
    },
}

impl TesseraError {
    /// Wrap this error with the operation, collection and ID it came from.
    pub fn in_operation(
        self,
        operation: &'static str,
        collection: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        TesseraError::Operation {
            operation,
            collection: collection.into(),
            id,
            source: Box::new(self),
        }
    }

    /// The innermost error, with all operation context removed.
    pub fn root(&self) -> &TesseraError {
        match self {
            TesseraError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the root cause came from the document store.
    pub fn is_storage(&self) -> bool {
        matches!(self.root(), TesseraError::Storage(_))
    }

    /// Whether the root cause came from the cache provider.
    pub fn is_cache(&self) -> bool {
        matches!(self.root(), TesseraError::Cache(_))
    }
}

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================
