//! Tessera Core - Document Model
//!
//! Data types shared by every Tessera crate: documents and their identities,
//! dotted-path update descriptors, references, errors, and configuration.
//! No I/O happens here.

pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod path;
pub mod reference;

pub use config::{
    CacheSettings, DatabaseConfig, RepositoryConfig, TesseraConfig, DEFAULT_LMDB_MAX_SIZE_MB,
    DEFAULT_NAMESPACE,
};
pub use document::{
    compare_values, document_id, field_contains, get_path, id_query, is_new, merge_defaults,
    values_equal, Document, ID_FIELD,
};
pub use error::{
    CacheError, ConfigError, ReferenceError, StorageError, TesseraError, TesseraResult,
    ValidationError,
};
pub use identity::{DocumentId, ObjectId, OID_KEY};
pub use path::{build_path, each, operator, ops, PathDescriptor};
pub use reference::{DbRef, Reference};

/// Re-exported so callers can build documents without a direct dependency.
pub use serde_json::{json, Value};
