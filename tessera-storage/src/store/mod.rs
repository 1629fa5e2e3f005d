//! Document store binding and the in-memory store.

mod memory;
mod options;
mod query;
mod traits;
mod update;

pub use memory::{InMemoryCollection, InMemoryConnector, InMemoryDatabase, ID_INDEX};
pub use options::{
    FindAndModifyOptions, FindOptions, IndexInfo, IndexOptions, RemoveOptions, UpdateOptions,
    WriteConcern,
};
pub use traits::{DatabaseConnector, DocumentCollection, DocumentDatabase, DocumentStream};
