//! Update operator application for the in-memory store.

use serde_json::{Number, Value};
use tessera_core::{field_contains, ops, values_equal, Document, StorageError, ID_FIELD};

use super::query::{is_operator_object, matches};

/// Whether this update should run as an upsert insert or against an existing
/// document. `$setOnInsert` only applies to the former.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApplyMode {
    Existing,
    Inserting,
}

/// Apply `update` to `doc` in place.
///
/// An update with no `$` keys replaces every field except `_id`. Mixing
/// operators and plain fields is rejected.
pub(crate) fn apply_update(
    doc: &mut Document,
    update: &Document,
    mode: ApplyMode,
) -> Result<(), StorageError> {
    let operator_count = update.keys().filter(|k| k.starts_with('$')).count();
    if operator_count == 0 {
        return replace(doc, update);
    }
    if operator_count != update.len() {
        return Err(StorageError::InvalidUpdate {
            path: String::new(),
            reason: "cannot mix update operators and replacement fields".to_string(),
        });
    }

    for (op, fields) in update {
        let Value::Object(fields) = fields else {
            return Err(StorageError::InvalidUpdate {
                path: op.clone(),
                reason: "operator argument must be an object".to_string(),
            });
        };
        for (path, value) in fields {
            if path == ID_FIELD && op != ops::SET_ON_INSERT {
                return Err(StorageError::InvalidUpdate {
                    path: path.clone(),
                    reason: "_id is immutable".to_string(),
                });
            }
            match op.as_str() {
                ops::SET => set_path(doc, path, value.clone())?,
                ops::SET_ON_INSERT => {
                    if mode == ApplyMode::Inserting {
                        set_path(doc, path, value.clone())?;
                    }
                }
                ops::UNSET => unset_path(doc, path),
                ops::INC => inc_path(doc, path, value)?,
                ops::PUSH => push_path(doc, path, value)?,
                ops::PULL => pull_path(doc, path, value)?,
                ops::PULL_ALL => pull_all_path(doc, path, value)?,
                other => {
                    return Err(StorageError::InvalidUpdate {
                        path: path.clone(),
                        reason: format!("unsupported operator {}", other),
                    })
                }
            }
        }
    }
    Ok(())
}

fn replace(doc: &mut Document, replacement: &Document) -> Result<(), StorageError> {
    if let (Some(new_id), Some(old_id)) = (replacement.get(ID_FIELD), doc.get(ID_FIELD)) {
        if !values_equal(new_id, old_id) {
            return Err(StorageError::InvalidUpdate {
                path: ID_FIELD.to_string(),
                reason: "_id is immutable".to_string(),
            });
        }
    }
    let id = doc.remove(ID_FIELD);
    doc.clear();
    if let Some(id) = id {
        doc.insert(ID_FIELD.to_string(), id);
    }
    for (key, value) in replacement {
        if key != ID_FIELD {
            doc.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

/// Walk to the parent object of `path`, creating intermediate objects when
/// `create` is set. Returns the parent and the final segment.
fn parent_mut<'a, 'p>(
    doc: &'a mut Document,
    path: &'p str,
    create: bool,
) -> Result<Option<(&'a mut Document, &'p str)>, StorageError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return Ok(None);
    };
    let mut current = doc;
    for segment in segments {
        if !current.contains_key(segment) {
            if !create {
                return Ok(None);
            }
            current.insert(segment.to_string(), Value::Object(Document::new()));
        }
        current = match current.get_mut(segment) {
            Some(Value::Object(map)) => map,
            Some(Value::Null) if create => {
                return Err(StorageError::InvalidUpdate {
                    path: path.to_string(),
                    reason: format!("cannot create field inside null {}", segment),
                })
            }
            Some(_) if create => {
                return Err(StorageError::InvalidUpdate {
                    path: path.to_string(),
                    reason: format!("{} is not an object", segment),
                })
            }
            _ => return Ok(None),
        };
    }
    Ok(Some((current, last)))
}

fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), StorageError> {
    if let Some((parent, key)) = parent_mut(doc, path, true)? {
        parent.insert(key.to_string(), value);
    }
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) {
    if let Ok(Some((parent, key))) = parent_mut(doc, path, false) {
        parent.shift_remove(key);
    }
}

fn inc_path(doc: &mut Document, path: &str, amount: &Value) -> Result<(), StorageError> {
    let Value::Number(amount) = amount else {
        return Err(StorageError::InvalidUpdate {
            path: path.to_string(),
            reason: "$inc amount must be a number".to_string(),
        });
    };
    let Some((parent, key)) = parent_mut(doc, path, true)? else {
        return Ok(());
    };
    let next = match parent.get(key) {
        None => Value::Number(amount.clone()),
        Some(Value::Number(current)) => Value::Number(add_numbers(current, amount)),
        Some(_) => {
            return Err(StorageError::InvalidUpdate {
                path: path.to_string(),
                reason: "cannot $inc a non-numeric field".to_string(),
            })
        }
    };
    parent.insert(key.to_string(), next);
    Ok(())
}

fn add_numbers(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Number::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).unwrap_or_else(|| Number::from(0))
}

/// Array at `path`, created empty when missing.
fn array_mut<'a>(doc: &'a mut Document, path: &str) -> Result<&'a mut Vec<Value>, StorageError> {
    let not_array = || StorageError::InvalidUpdate {
        path: path.to_string(),
        reason: "field is not an array".to_string(),
    };
    let (parent, key) = parent_mut(doc, path, true)?.ok_or_else(not_array)?;
    let entry = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match entry {
        Value::Array(items) => Ok(items),
        _ => Err(not_array()),
    }
}

fn push_path(doc: &mut Document, path: &str, value: &Value) -> Result<(), StorageError> {
    let values = match value {
        Value::Object(map) if map.len() == 1 && map.contains_key(ops::EACH) => {
            match map.get(ops::EACH) {
                Some(Value::Array(values)) => values.clone(),
                _ => {
                    return Err(StorageError::InvalidUpdate {
                        path: path.to_string(),
                        reason: "$each needs an array".to_string(),
                    })
                }
            }
        }
        other => vec![other.clone()],
    };
    array_mut(doc, path)?.extend(values);
    Ok(())
}

fn pull_path(doc: &mut Document, path: &str, condition: &Value) -> Result<(), StorageError> {
    let Some(items) = existing_array(doc, path)? else {
        return Ok(());
    };
    let mut failure = None;
    items.retain(|item| match pull_matches(item, condition) {
        Ok(hit) => !hit,
        Err(e) => {
            failure.get_or_insert(e);
            true
        }
    });
    failure.map_or(Ok(()), Err)
}

fn pull_matches(item: &Value, condition: &Value) -> Result<bool, StorageError> {
    if is_operator_object(condition) {
        let mut wrapper = Document::new();
        wrapper.insert("v".to_string(), item.clone());
        let mut query = Document::new();
        query.insert("v".to_string(), condition.clone());
        return matches(&wrapper, &query);
    }
    Ok(values_equal(item, condition))
}

fn pull_all_path(doc: &mut Document, path: &str, values: &Value) -> Result<(), StorageError> {
    let Value::Array(values) = values else {
        return Err(StorageError::InvalidUpdate {
            path: path.to_string(),
            reason: "$pullAll needs an array".to_string(),
        });
    };
    if let Some(items) = existing_array(doc, path)? {
        let remove = Value::Array(values.clone());
        items.retain(|item| !field_contains(&remove, item));
    }
    Ok(())
}

/// Array at `path` if the field exists; an error if it exists but is not an
/// array.
fn existing_array<'a>(
    doc: &'a mut Document,
    path: &str,
) -> Result<Option<&'a mut Vec<Value>>, StorageError> {
    let Some((parent, key)) = parent_mut(doc, path, false)? else {
        return Ok(None);
    };
    match parent.get_mut(key) {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(StorageError::InvalidUpdate {
            path: path.to_string(),
            reason: "field is not an array".to_string(),
        }),
    }
}
