//! Per-collection hash indexes.
//!
//! An index names one or more dot-path fields and maps the tuple of their
//! values (joined into a single canonical key) to the set of document ids
//! that currently hold that tuple. This accelerates equality-shaped
//! predicates (`$eq`, `$in`, and bare-value equality) in [`crate::query`];
//! anything else falls back to a full collection scan.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{DbError, Result};
use crate::value::{get_path, Document, Value};

/// One named index over a fixed set of fields.
struct Index {
    fields: Vec<String>,
    unique: bool,
    sparse: bool,
    /// canonical composite key -> document ids holding that key
    entries: HashMap<String, HashSet<String>>,
}

impl Index {
    /// Build the canonical key for a document's values at this index's
    /// fields. Returns `None` when `sparse` and any field is missing.
    fn key_for(&self, doc: &Document) -> Option<String> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match get_path(doc, field) {
                Some(v) => parts.push(canonical_key_part(v)),
                None => {
                    if self.sparse {
                        return None;
                    }
                    parts.push("\u{0}null".to_string());
                }
            }
        }
        Some(parts.join("\u{1}"))
    }
}

/// A stable textual encoding of a `Value` suitable for joining into a
/// composite index key. Distinct kinds never collide because the kind tag
/// is folded into the prefix.
fn canonical_key_part(value: &Value) -> String {
    match value {
        Value::Null => "\u{0}null".to_string(),
        Value::Bool(b) => format!("\u{0}bool:{}", b),
        Value::Number(n) => format!("\u{0}num:{}", n),
        Value::String(s) => format!("\u{0}str:{}", s),
        Value::Array(_) | Value::Object(_) => {
            format!("\u{0}json:{}", value.to_json())
        }
    }
}

/// Manages every index defined for one collection.
#[derive(Default)]
pub struct IndexManager {
    indexes: BTreeMap<String, Index>,
}

/// Derive an index's canonical name from its field list, e.g.
/// `["email"]` -> `"email"`, `["lastName", "firstName"]` -> `"lastName:firstName"`.
pub fn index_name(fields: &[String]) -> String {
    fields.join(":")
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new index and backfill it from `existing` documents.
    /// Returns an error if a unique index's backfill finds a duplicate key.
    pub fn create_index<'a>(
        &mut self,
        fields: Vec<String>,
        unique: bool,
        sparse: bool,
        existing: impl Iterator<Item = (&'a str, &'a Document)>,
    ) -> Result<String> {
        let name = index_name(&fields);
        let mut index = Index {
            fields,
            unique,
            sparse,
            entries: HashMap::new(),
        };

        for (id, doc) in existing {
            if let Some(key) = index.key_for(doc) {
                let bucket = index.entries.entry(key).or_default();
                if unique && !bucket.is_empty() && !bucket.contains(id) {
                    return Err(DbError::unique_violation(&name, "collection"));
                }
                bucket.insert(id.to_string());
            }
        }

        self.indexes.insert(name.clone(), index);
        Ok(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Fields covered by each index, for the query planner to decide
    /// whether a filter can be served by an index.
    pub fn fields_for(&self, name: &str) -> Option<&[String]> {
        self.indexes.get(name).map(|i| i.fields.as_slice())
    }

    /// Insert `doc` (identified by `id`) into every index, checking unique
    /// constraints first so a violation leaves no index partially updated.
    pub fn index_document(&mut self, id: &str, doc: &Document) -> Result<()> {
        for (name, index) in &self.indexes {
            if let Some(key) = index.key_for(doc) {
                if index.unique {
                    if let Some(bucket) = index.entries.get(&key) {
                        if !bucket.is_empty() && !bucket.contains(id) {
                            return Err(DbError::unique_violation(name, "collection"));
                        }
                    }
                }
            }
        }
        for index in self.indexes.values_mut() {
            if let Some(key) = index.key_for(doc) {
                index.entries.entry(key).or_default().insert(id.to_string());
            }
        }
        Ok(())
    }

    /// Remove a document from every index it appears in.
    pub fn remove_document(&mut self, id: &str, doc: &Document) {
        for index in self.indexes.values_mut() {
            if let Some(key) = index.key_for(doc) {
                if let Some(bucket) = index.entries.get_mut(&key) {
                    bucket.remove(id);
                    if bucket.is_empty() {
                        index.entries.remove(&key);
                    }
                }
            }
        }
    }

    /// Look up documents matching `field = value` via an index exactly
    /// covering that single field, if one exists.
    pub fn query_equals(&self, field: &str, value: &Value) -> Option<HashSet<String>> {
        let name = index_name(std::slice::from_ref(&field.to_string()));
        let index = self.indexes.get(&name)?;
        let key = canonical_key_part(value);
        Some(index.entries.get(&key).cloned().unwrap_or_default())
    }

    /// Union of `query_equals` across multiple candidate values, for `$in`.
    pub fn query_in(&self, field: &str, values: &[Value]) -> Option<HashSet<String>> {
        let name = index_name(std::slice::from_ref(&field.to_string()));
        if !self.indexes.contains_key(&name) {
            return None;
        }
        let mut out = HashSet::new();
        for v in values {
            if let Some(ids) = self.query_equals(field, v) {
                out.extend(ids);
            }
        }
        Some(out)
    }
}
