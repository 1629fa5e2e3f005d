//! Tessera Storage - Cache-Aside Document Repository
//!
//! Keeps a document cache consistent with a schemaless document store while
//! callers load, store and surgically mutate documents by ID.
//! The store is reached only through the traits in [`store`]; an in-memory
//! implementation ships alongside them.

pub mod cache;
pub mod context;
pub mod registry;
pub mod repository;
pub mod store;

pub use cache::{
    CacheKey, CacheProvider, CacheStats, KeyValueClient, LmdbCache, LmdbCacheError, MemoryCache,
    NoCache, RemoteCache,
};
#[cfg(feature = "redis")]
pub use cache::RedisClient;
pub use context::{build_cache, TesseraContext};
pub use registry::RepositoryRegistry;
pub use repository::{CacheAsideRepository, ReferenceResolver, ReferenceTarget};
pub use store::{
    DatabaseConnector, DocumentCollection, DocumentDatabase, DocumentStream, FindAndModifyOptions,
    FindOptions, InMemoryCollection, InMemoryConnector, InMemoryDatabase, IndexInfo, IndexOptions,
    RemoveOptions, UpdateOptions, WriteConcern,
};
