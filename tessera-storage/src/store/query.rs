//! Query matching, projection and sorting for the in-memory store.

use std::cmp::Ordering;

use serde_json::Value;
use tessera_core::{
    compare_values, field_contains, get_path, values_equal, Document, StorageError, ID_FIELD,
};

const QUERY_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$in", "$nin", "$all", "$exists", "$gt", "$gte", "$lt", "$lte",
];

/// True when `value` is an operator object such as `{"$in": [...]}` rather
/// than a literal (literals include `{"$oid": ...}` and embedded references).
pub(crate) fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && map.keys().all(|k| QUERY_OPERATORS.contains(&k.as_str()))
        }
        _ => false,
    }
}

/// Does `doc` satisfy every condition in `query`?
pub(crate) fn matches(doc: &Document, query: &Document) -> Result<bool, StorageError> {
    for (path, condition) in query {
        let actual = get_path(doc, path);
        if !matches_condition(actual, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(actual: Option<&Value>, condition: &Value) -> Result<bool, StorageError> {
    let Value::Object(ops) = condition else {
        return Ok(literal_match(actual, condition));
    };
    if !is_operator_object(condition) {
        return Ok(literal_match(actual, condition));
    }

    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => literal_match(actual, operand),
            "$ne" => !literal_match(actual, operand),
            "$in" => array_operand(op, operand)?
                .iter()
                .any(|v| literal_match(actual, v)),
            "$nin" => !array_operand(op, operand)?
                .iter()
                .any(|v| literal_match(actual, v)),
            "$all" => {
                let wanted = array_operand(op, operand)?;
                actual.is_some() && wanted.iter().all(|v| literal_match(actual, v))
            }
            "$exists" => {
                let want = operand.as_bool().unwrap_or(true);
                actual.is_some() == want
            }
            "$gt" => range_match(actual, operand, |o| o == Ordering::Greater),
            "$gte" => range_match(actual, operand, |o| o != Ordering::Less),
            "$lt" => range_match(actual, operand, |o| o == Ordering::Less),
            "$lte" => range_match(actual, operand, |o| o != Ordering::Greater),
            other => {
                return Err(StorageError::InvalidQuery {
                    reason: format!("unsupported operator {}", other),
                })
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn literal_match(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(value) => field_contains(value, expected),
        None => expected.is_null(),
    }
}

fn range_match(actual: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let same_kind = |v: &Value| std::mem::discriminant(v) == std::mem::discriminant(bound);
    match actual {
        Some(Value::Array(items)) if !bound.is_array() => items
            .iter()
            .any(|item| same_kind(item) && accept(compare_values(item, bound))),
        Some(value) => same_kind(value) && accept(compare_values(value, bound)),
        None => false,
    }
}

fn array_operand<'a>(op: &str, operand: &'a Value) -> Result<&'a Vec<Value>, StorageError> {
    operand.as_array().ok_or_else(|| StorageError::InvalidQuery {
        reason: format!("{} needs an array", op),
    })
}

/// Equality fields of a query that can seed an upserted document.
pub(crate) fn equality_fields(query: &Document) -> Vec<(&str, Value)> {
    query
        .iter()
        .filter_map(|(path, condition)| {
            if is_operator_object(condition) {
                let eq = condition.get("$eq")?;
                Some((path.as_str(), eq.clone()))
            } else {
                Some((path.as_str(), condition.clone()))
            }
        })
        .collect()
}

/// Apply an inclusion projection. `_id` is always kept.
pub(crate) fn project(doc: &Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection else {
        return doc.clone();
    };
    let included: Vec<&str> = projection
        .iter()
        .filter(|(_, flag)| is_truthy(flag))
        .map(|(path, _)| path.as_str())
        .collect();
    if included.is_empty() {
        return doc.clone();
    }

    let mut out = Document::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for path in included {
        if let Some(value) = get_path(doc, path) {
            insert_path(&mut out, path, value.clone());
        }
    }
    out
}

fn is_truthy(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

fn insert_path(out: &mut Document, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut current = out;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if !entry.is_object() {
            *entry = Value::Object(Document::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Order documents by a `{path: 1 | -1}` specification.
pub(crate) fn compare_by(sort: &Document, a: &Document, b: &Document) -> Ordering {
    for (path, direction) in sort {
        let descending = direction.as_i64().is_some_and(|d| d < 0);
        let left = get_path(a, path).unwrap_or(&Value::Null);
        let right = get_path(b, path).unwrap_or(&Value::Null);
        let ord = compare_values(left, right);
        let ord = if descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Rendering of a document's index key values, used in duplicate-key errors.
pub(crate) fn index_key(doc: &Document, keys: &Document) -> String {
    let values: Vec<Value> = keys
        .keys()
        .map(|path| get_path(doc, path).cloned().unwrap_or(Value::Null))
        .collect();
    Value::Array(values).to_string()
}

/// Whether two documents carry the same value for a unique index.
pub(crate) fn same_index_key(a: &Document, b: &Document, keys: &Document) -> bool {
    keys.keys().all(|path| {
        match (get_path(a, path), get_path(b, path)) {
            (Some(x), Some(y)) => values_equal(x, y),
            (None, None) => true,
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_literal_equality_and_array_membership() {
        let d = doc(json!({"_id": 1, "tags": ["a", "b"], "name": "x"}));
        assert!(matches(&d, &doc(json!({"_id": 1}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": "a"}))).unwrap());
        assert!(!matches(&d, &doc(json!({"tags": "c"}))).unwrap());
        assert!(matches(&d, &doc(json!({"missing": null}))).unwrap());
    }

    #[test]
    fn test_in_and_all() {
        let d = doc(json!({"tags": ["a", "b"]}));
        assert!(matches(&d, &doc(json!({"tags": {"$in": ["z", "b"]}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"tags": {"$in": ["z"]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": {"$all": ["a", "b"]}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"tags": {"$all": ["a", "c"]}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"other": {"$all": []}}))).unwrap());
    }

    #[test]
    fn test_ranges_and_exists() {
        let d = doc(json!({"n": 5, "s": "m"}));
        assert!(matches(&d, &doc(json!({"n": {"$gt": 4, "$lte": 5}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"n": {"$lt": 5}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"s": {"$gt": 1}}))).unwrap());
        assert!(matches(&d, &doc(json!({"n": {"$exists": true}}))).unwrap());
        assert!(matches(&d, &doc(json!({"x": {"$exists": false}}))).unwrap());
    }

    #[test]
    fn test_oid_literal_is_not_an_operator() {
        let id = json!({"$oid": "00112233445566778899aabb"});
        let d = doc(json!({"_id": id.clone()}));
        assert!(matches(&d, &doc(json!({"_id": id}))).unwrap());
    }

    #[test]
    fn test_non_array_in_operand_is_rejected() {
        let d = doc(json!({"n": 1}));
        assert!(matches(&d, &doc(json!({"n": {"$in": 1}}))).is_err());
    }

    #[test]
    fn test_projection_keeps_id_and_nested_paths() {
        let d = doc(json!({"_id": 1, "a": {"b": 2, "c": 3}, "d": 4}));
        let p = project(&d, Some(&doc(json!({"a.b": 1}))));
        assert_eq!(Value::Object(p), json!({"_id": 1, "a": {"b": 2}}));
    }

    #[test]
    fn test_empty_projection_returns_whole_document() {
        let d = doc(json!({"_id": 1, "a": 2}));
        assert_eq!(project(&d, Some(&Document::new())), d);
    }

    #[test]
    fn test_compare_by() {
        let a = doc(json!({"n": 1, "s": "b"}));
        let b = doc(json!({"n": 1, "s": "a"}));
        assert_eq!(compare_by(&doc(json!({"n": 1, "s": -1})), &a, &b), Ordering::Less);
        assert_eq!(compare_by(&doc(json!({"s": 1})), &a, &b), Ordering::Greater);
    }
}
