//! Dotted-path update descriptors.
//!
//! Every partial mutation sent to the store addresses exactly one field
//! through a [`PathDescriptor`]: either a top-level field (`tags`) or a key
//! one level inside an object-valued field (`counters.hits`). Deeper paths
//! must be composed by the caller and passed as the field name.

use serde_json::{json, Value};

use crate::document::Document;

/// Update operators understood by the store binding.
pub mod ops {
    pub const SET: &str = "$set";
    pub const UNSET: &str = "$unset";
    pub const INC: &str = "$inc";
    pub const PUSH: &str = "$push";
    pub const PULL: &str = "$pull";
    pub const PULL_ALL: &str = "$pullAll";
    pub const SET_ON_INSERT: &str = "$setOnInsert";
    pub const EACH: &str = "$each";
}

/// A single `{"<path>": value}` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PathDescriptor {
    path: String,
    value: Value,
}

impl PathDescriptor {
    /// The effective dotted key.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The value addressed at [`path`](Self::path).
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Single-entry document form.
    pub fn into_document(self) -> Document {
        let mut doc = Document::new();
        doc.insert(self.path, self.value);
        doc
    }
}

/// Build a descriptor for `field`, optionally nested under `prefix`.
pub fn build_path(field: &str, value: impl Into<Value>, prefix: Option<&str>) -> PathDescriptor {
    let path = match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, field),
        _ => field.to_string(),
    };
    PathDescriptor {
        path,
        value: value.into(),
    }
}

/// Wrap a descriptor into an update document: `{op: {path: value}}`.
pub fn operator(op: &str, descriptor: PathDescriptor) -> Document {
    let mut doc = Document::new();
    doc.insert(op.to_string(), Value::Object(descriptor.into_document()));
    doc
}

/// `{"$each": values}` modifier for bulk `$push`.
pub fn each(values: Vec<Value>) -> Value {
    json!({ ops::EACH: values })
}
