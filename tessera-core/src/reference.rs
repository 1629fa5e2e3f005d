//! Cross-collection references.
//!
//! A field can point at another document in one of two shapes:
//!
//! - manual: the field value itself is the target `_id`; collection and
//!   database come from the caller or default to the referencing document's
//! - embedded: `{"$ref": <collection>, "$id": <id>, "$db": <database>}`
//!   stored inline, with `$db` optional
//!
//! Embedded resolution relies on the store handing the reserved keys back
//! untouched. A driver that rewrites them makes the value look like a manual
//! reference with an object as its ID.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::DocumentId;

pub const REF_KEY: &str = "$ref";
pub const ID_KEY: &str = "$id";
pub const DB_KEY: &str = "$db";

/// Embedded reference object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbRef {
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(rename = "$id")]
    pub id: Value,
    #[serde(rename = "$db", default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl DbRef {
    pub fn new(collection: impl Into<String>, id: &DocumentId) -> Self {
        Self {
            collection: Some(collection.into()),
            id: id.to_value(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Encode for storage inside a document.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A stored pointer to another document.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Manual(Value),
    Embedded(DbRef),
}

impl Reference {
    /// Interpret a stored field value.
    ///
    /// Objects carrying `$id` are embedded references; anything else is the
    /// target ID of a manual reference.
    pub fn from_value(value: Value) -> Self {
        let embedded = matches!(&value, Value::Object(map) if map.contains_key(ID_KEY));
        if embedded {
            if let Ok(dbref) = serde_json::from_value::<DbRef>(value.clone()) {
                return Reference::Embedded(dbref);
            }
        }
        Reference::Manual(value)
    }

    /// Target ID in raw value form.
    pub fn id_value(&self) -> &Value {
        match self {
            Reference::Manual(value) => value,
            Reference::Embedded(dbref) => &dbref.id,
        }
    }

    /// Target collection, if the reference carries one.
    pub fn collection(&self) -> Option<&str> {
        match self {
            Reference::Manual(_) => None,
            Reference::Embedded(dbref) => dbref.collection.as_deref(),
        }
    }

    /// Target database, if the reference carries one.
    pub fn database(&self) -> Option<&str> {
        match self {
            Reference::Manual(_) => None,
            Reference::Embedded(dbref) => dbref.database.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manual_reference() {
        let r = Reference::from_value(json!("user-1"));
        assert_eq!(r, Reference::Manual(json!("user-1")));
        assert_eq!(r.collection(), None);
    }

    #[test]
    fn test_embedded_reference() {
        let r = Reference::from_value(json!({"$ref": "users", "$id": 7, "$db": "crm"}));
        assert_eq!(r.collection(), Some("users"));
        assert_eq!(r.database(), Some("crm"));
        assert_eq!(r.id_value(), &json!(7));
    }

    #[test]
    fn test_oid_object_is_manual() {
        let r = Reference::from_value(json!({"$oid": "00112233445566778899aabb"}));
        assert!(matches!(r, Reference::Manual(_)));
    }

    #[test]
    fn test_dbref_encoding() {
        let value = DbRef::new("users", &DocumentId::from(3))
            .with_database("crm")
            .to_value();
        assert_eq!(value, json!({"$ref": "users", "$id": 3, "$db": "crm"}));
    }
}
