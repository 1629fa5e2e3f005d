//! Document model and value helpers.
//!
//! Documents are ordered JSON objects. The only field with meaning to this
//! layer is `_id`; everything else is caller-defined.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::identity::DocumentId;

/// Name of the identity field.
pub const ID_FIELD: &str = "_id";

/// A schemaless document.
pub type Document = Map<String, Value>;

/// Identity of a document, if it has a usable one.
pub fn document_id(doc: &Document) -> Option<DocumentId> {
    doc.get(ID_FIELD).and_then(DocumentId::from_value)
}

/// True iff the document has not been persisted yet (no `_id`).
pub fn is_new(doc: &Document) -> bool {
    match doc.get(ID_FIELD) {
        None | Some(Value::Null) => true,
        Some(_) => false,
    }
}

/// Merge `defaults` under `partial`: fields present in `partial` win.
pub fn merge_defaults(partial: Document, defaults: Document) -> Document {
    let mut merged = partial;
    for (key, value) in defaults {
        merged.entry(key).or_insert(value);
    }
    merged
}

/// A single-field `{"_id": id}` query.
pub fn id_query(id: &DocumentId) -> Document {
    let mut query = Document::new();
    query.insert(ID_FIELD.to_string(), id.to_value());
    query
}

/// Read a dotted path (`a.b.c`) from a document.
///
/// Numeric segments index into arrays.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Equality that compares numbers by numeric value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Containment as the store sees it: an array field contains the value as
/// an element (or equals it outright); a scalar field must equal it.
pub fn field_contains(field: &Value, value: &Value) -> bool {
    match field {
        Value::Array(items) => {
            items.iter().any(|item| values_equal(item, value)) || values_equal(field, value)
        }
        other => values_equal(other, value),
    }
}

/// Total order over JSON values used for sorting and range comparisons.
///
/// Values of different kinds order as null < numbers < strings < objects <
/// arrays < booleans.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                let ord = compare_values(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        (Value::Object(xm), Value::Object(ym)) => {
            for ((xk, xv), (yk, yv)) in xm.iter().zip(ym) {
                let ord = xk.cmp(yk).then_with(|| compare_values(xv, yv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xm.len().cmp(&ym.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}
