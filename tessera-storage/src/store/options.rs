//! Option structs for the store primitives.

use tessera_core::Document;

/// Acknowledgement level requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteConcern {
    /// Fire and forget.
    Unacknowledged,
    /// Wait for the primary to acknowledge (`w: 1`).
    #[default]
    Acknowledged,
}

/// Options for [`find`](super::DocumentCollection::find).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Inclusion projection (`{path: 1}`); `None` returns whole documents.
    pub projection: Option<Document>,
    /// Sort specification (`{path: 1 | -1}`).
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Documents fetched per round trip. A hint; stores may ignore it.
    pub batch_size: Option<u32>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Options for [`find_and_modify`](super::DocumentCollection::find_and_modify).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModifyOptions {
    /// Insert when nothing matches.
    pub upsert: bool,
    /// Return the document after the update instead of before.
    pub return_new: bool,
    /// Restrict the returned document.
    pub projection: Option<Document>,
    pub write_concern: WriteConcern,
}

impl FindAndModifyOptions {
    /// Return-new, no upsert: the shape every cached mutation uses.
    pub fn returning_new() -> Self {
        Self {
            return_new: true,
            ..Self::default()
        }
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options for [`update`](super::DocumentCollection::update).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub upsert: bool,
    /// Update every match instead of the first.
    pub multi: bool,
    pub write_concern: WriteConcern,
}

/// Options for [`remove`](super::DocumentCollection::remove).
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveOptions {
    /// Remove at most one document.
    pub just_one: bool,
    pub write_concern: WriteConcern,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            just_one: true,
            write_concern: WriteConcern::Acknowledged,
        }
    }
}

/// Options for [`create_index`](super::DocumentCollection::create_index).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Override the generated name.
    pub name: Option<String>,
    /// Reject writes that would duplicate the indexed key.
    pub unique: bool,
}

/// Description of an existing index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
}
