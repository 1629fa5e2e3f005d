//! Cache providers for the cache-aside repository.
//!
//! A provider stores whole documents under a [`CacheKey`]. Reads report
//! failures; writes and deletes log them and carry on, so a broken cache
//! degrades to extra store round trips rather than failed operations.
//!
//! Four providers ship:
//!
//! - [`NoCache`]: always misses, the "caching off" provider.
//! - [`MemoryCache`]: in-process map with usage counters.
//! - [`RemoteCache`]: any string key/value service behind [`KeyValueClient`]
//!   (Redis with the `redis` feature).
//! - [`LmdbCache`]: persistent on-disk cache.

mod cache_key;
mod lmdb;
mod memory;
mod no_cache;
mod remote;
mod traits;

pub use cache_key::CacheKey;
pub use lmdb::{LmdbCache, LmdbCacheError};
pub use memory::MemoryCache;
pub use no_cache::NoCache;
#[cfg(feature = "redis")]
pub use remote::RedisClient;
pub use remote::{KeyValueClient, RemoteCache};
pub use traits::{CacheProvider, CacheStats};
