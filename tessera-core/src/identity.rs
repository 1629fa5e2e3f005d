//! Identity types for stored documents

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ValidationError;

/// Reserved key used to carry an [`ObjectId`] inside a JSON document.
pub const OID_KEY: &str = "$oid";

/// Per-process random bytes mixed into every generated ObjectId.
static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| {
    let random = Uuid::new_v4();
    let mut bytes = [0u8; 5];
    bytes.copy_from_slice(&random.as_bytes()[0..5]);
    bytes
});

/// Wrapping 24-bit counter, seeded randomly per process.
static COUNTER: Lazy<AtomicU32> = Lazy::new(|| {
    let random = Uuid::new_v4();
    let b = random.as_bytes();
    AtomicU32::new(u32::from_be_bytes([0, b[5], b[6], b[7]]))
});

/// Store-generated 12-byte identifier.
///
/// # Binary Format
///
/// - Bytes 0-3: seconds since the Unix epoch (big-endian)
/// - Bytes 4-8: process-unique random value
/// - Bytes 9-11: counter (big-endian, wraps at 2^24)
///
/// Identifiers generated by one process sort by creation second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        let seconds = Utc::now().timestamp() as u32;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parse from 24 hex characters.
    pub fn parse_str(s: &str) -> Result<Self, ValidationError> {
        let decoded = hex::decode(s).map_err(|e| ValidationError::InvalidIdentifier {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        let bytes: [u8; 12] =
            decoded
                .try_into()
                .map_err(|_| ValidationError::InvalidIdentifier {
                    value: s.to_string(),
                    reason: "expected 12 bytes".to_string(),
                })?;
        Ok(Self(bytes))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Seconds since the Unix epoch at generation time.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

/// Identity of a stored document.
///
/// Equality is by value. The `Display` form is used verbatim as the cache
/// key suffix.
///
/// Known limitation: `String("1")` and `Int(1)` are distinct documents in
/// the store but display the same, so within one collection they share a
/// cache entry. Mixing string and integer IDs in one collection is not
/// supported.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentId {
    /// Store-generated identifier.
    ObjectId(ObjectId),
    /// Caller-supplied string.
    String(String),
    /// Caller-supplied integer.
    Int(i64),
}

impl DocumentId {
    /// Encode for use inside a document or query.
    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::ObjectId(oid) => json!({ OID_KEY: oid.to_hex() }),
            DocumentId::String(s) => Value::String(s.clone()),
            DocumentId::Int(n) => Value::from(*n),
        }
    }

    /// Decode from a document value.
    ///
    /// Returns `None` for values that cannot be identities (floats, arrays,
    /// booleans, null, and objects other than `{"$oid": ...}`).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(DocumentId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(DocumentId::Int),
            Value::Object(map) if map.len() == 1 => map
                .get(OID_KEY)
                .and_then(Value::as_str)
                .and_then(|hex| ObjectId::parse_str(hex).ok())
                .map(DocumentId::ObjectId),
            _ => None,
        }
    }

    /// Generate a fresh store-style identifier.
    pub fn generate() -> Self {
        DocumentId::ObjectId(ObjectId::new())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::ObjectId(oid) => write!(f, "{}", oid),
            DocumentId::String(s) => f.write_str(s),
            DocumentId::Int(n) => write!(f, "{}", n),
        }
    }
}

impl From<ObjectId> for DocumentId {
    fn from(oid: ObjectId) -> Self {
        DocumentId::ObjectId(oid)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId::String(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId::String(s)
    }
}

impl From<i64> for DocumentId {
    fn from(n: i64) -> Self {
        DocumentId::Int(n)
    }
}

// =============================================================================
// TESTS
// =============================================================================
