//! Document data model.
//!
//! A [`Value`] is a tagged union over the JSON kinds (null, bool, number,
//! string, array, object). A [`Document`] is the `object` case at the root:
//! an ordered-by-key map from field name to `Value`. Every document carries
//! a reserved `_id` string field.
//!
//! `Value`'s object variant is a `BTreeMap` rather than an insertion-ordered
//! map so that two documents with the same fields always serialize to the
//! same bytes — this is what makes the AOL checksum and the binary
//! container's payload checksum meaningful.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The reserved document-identifier field.
pub const ID_FIELD: &str = "_id";

/// A JSON-like value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// A document is the object case at the root.
pub type Document = BTreeMap<String, Value>;

/// Type rank used to give `Value` a total order across kinds, per the
/// cross-type comparison rule: null < bool < number < string < array < object.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            (a, b) => type_rank(a).cmp(&type_rank(b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(_) | Value::Object(_) => {
                write!(f, "{}", serde_json::to_string(&self.to_json()).unwrap_or_default())
            }
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Convert a `serde_json::Value` into our tagged union, recursively.
    pub fn from_json(v: JsonValue) -> Value {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(a) => Value::Array(a.into_iter().map(Value::from_json).collect()),
            JsonValue::Object(o) => Value::Object(
                o.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back into a `serde_json::Value`, e.g. for returning documents
    /// to callers who expect plain JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(a) => JsonValue::Array(a.iter().map(Value::to_json).collect()),
            Value::Object(o) => {
                JsonValue::Object(o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

/// Build a [`Document`] from a `serde_json::Value`, requiring it to be an
/// object at the root.
pub fn document_from_json(v: JsonValue) -> Option<Document> {
    match Value::from_json(v) {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Traverse a document by a dot-separated field path (e.g. `"address.city"`),
/// returning `None` when any intermediate segment is missing or not an
/// object, or the path indexes an array with a non-numeric segment.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for seg in segments {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(arr) => {
                let idx: usize = seg.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Set a value at a dot-separated field path, creating intermediate objects
/// as needed. Used by `Collection::update`'s shallow-merge semantics when a
/// caller supplies a nested update key.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().expect("path must have at least one segment");
    let mut current = doc;
    for seg in segments {
        let entry = current
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(BTreeMap::new()));
        if !matches!(entry, Value::Object(_)) {
            *entry = Value::Object(BTreeMap::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
    }
    current.insert(last.to_string(), value);
}

/// Extract a document's `_id`, if present and a string.
pub fn doc_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: JsonValue) -> Document {
        document_from_json(v).unwrap()
    }

    #[test]
    fn type_rank_orders_across_kinds() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Bool(true) < Value::Number(0.0));
        assert!(Value::Number(1e9) < Value::String("a".into()));
        assert!(Value::String("z".into()) < Value::Array(vec![]));
        assert!(Value::Array(vec![]) < Value::Object(BTreeMap::new()));
    }

    #[test]
    fn numbers_compare_naturally() {
        assert!(Value::Number(1.0) < Value::Number(2.0));
    }

    #[test]
    fn dot_path_traverses_nested_objects() {
        let d = doc(json!({"address": {"city": "Boston"}}));
        assert_eq!(get_path(&d, "address.city"), Some(&Value::String("Boston".into())));
        assert_eq!(get_path(&d, "address.zip"), None);
        assert_eq!(get_path(&d, "missing.city"), None);
    }

    #[test]
    fn dot_path_traverses_arrays_by_index() {
        let d = doc(json!({"tags": ["a", "b", "c"]}));
        assert_eq!(get_path(&d, "tags.1"), Some(&Value::String("b".into())));
        assert_eq!(get_path(&d, "tags.9"), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut d: Document = BTreeMap::new();
        set_path(&mut d, "a.b.c", Value::Number(1.0));
        assert_eq!(get_path(&d, "a.b.c"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn roundtrip_through_json() {
        let original = json!({"_id": "x", "age": 30, "tags": ["a", null], "nested": {"k": true}});
        let d = doc(original.clone());
        let back: JsonValue = Value::Object(d).to_json();
        assert_eq!(back, original);
    }

    #[test]
    fn doc_id_reads_reserved_field() {
        let d = doc(json!({"_id": "abc"}));
        assert_eq!(doc_id(&d), Some("abc"));
    }
}
