//! Collection — a named set of documents backed by one storage backend.
//!
//! Every document carries a unique `_id` (assigned from a UUIDv7 if the
//! caller doesn't supply one, so ids sort roughly by insertion time). Reads
//! are served from an in-memory map kept in sync with the storage log;
//! writes append a sealed [`LogEntry`] and, outside a transaction, flush
//! immediately so a successful call has already reached stable storage.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::index::IndexManager;
use crate::log_entry::{LogEntry, Op};
use crate::query::{Filter, Query};
use crate::storage::Storage;
use crate::transaction::TransactionManager;
use crate::value::{document_from_json, Document, Value, ID_FIELD};

pub struct Collection {
    name: String,
    storage: Box<dyn Storage>,
    documents: HashMap<String, Document>,
    indexes: IndexManager,
    checksums_enabled: bool,
}

impl Collection {
    /// Open a collection's backend and replay its log, applying only
    /// entries that are either autocommit (no `tx_id`) or belong to a
    /// transaction `tx` already knows committed.
    pub fn open(
        name: impl Into<String>,
        mut storage: Box<dyn Storage>,
        tx: &TransactionManager,
        checksums_enabled: bool,
    ) -> Result<Self> {
        let name = name.into();
        storage.initialize()?;
        let entries = storage.read_stream()?;

        let mut documents = HashMap::new();
        for entry in &entries {
            let visible = match &entry.tx_id {
                None => true,
                Some(tx_id) => tx.is_committed(tx_id),
            };
            if !visible {
                continue;
            }
            match entry.op {
                Op::Insert | Op::Update => {
                    if let Some(data) = entry.data.clone() {
                        documents.insert(entry.id.clone(), data);
                    }
                }
                Op::Delete => {
                    documents.remove(&entry.id);
                }
                Op::Begin | Op::Commit | Op::Rollback => {}
            }
        }

        log::info!("collection '{}' loaded {} document(s)", name, documents.len());

        Ok(Self {
            name,
            storage,
            documents,
            indexes: IndexManager::new(),
            checksums_enabled,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self, filter: Option<&Filter>) -> usize {
        match filter {
            None => self.documents.len(),
            Some(f) => self.documents.values().filter(|d| f.matches(d)).count(),
        }
    }

    pub fn find_one(&self, query: &Query) -> Option<Document> {
        self.find_all_limited(query, Some(1)).into_iter().next()
    }

    pub fn find_all(&self, query: &Query) -> Vec<Document> {
        self.find_all_limited(query, None)
    }

    fn find_all_limited(&self, query: &Query, cap: Option<usize>) -> Vec<Document> {
        let mut query = query.clone();
        if let Some(n) = cap {
            query.limit = Some(query.limit.map_or(n, |existing| existing.min(n)));
        }

        // Try an index-accelerated path for a bare equality / $in leaf
        // before falling back to a full scan.
        let candidate_ids = query.filter.as_ref().and_then(|f| {
            let (field, candidate) = f.indexable_leaf()?;
            match candidate {
                crate::query::IndexCandidate::Eq(v) => self.indexes.query_equals(field, v),
                crate::query::IndexCandidate::In(vs) => self.indexes.query_in(field, vs),
            }
        });

        let docs: Vec<Document> = match candidate_ids {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| self.documents.get(&id).cloned())
                .collect(),
            None => self.documents.values().cloned().collect(),
        };

        query.apply(docs)
    }

    pub fn create_index(&mut self, fields: Vec<String>, unique: bool, sparse: bool) -> Result<String> {
        self.indexes
            .create_index(fields, unique, sparse, self.documents.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.index_names()
    }

    pub fn insert(&mut self, value: serde_json::Value) -> Result<Document> {
        let doc = document_from_json(value)
            .ok_or_else(|| DbError::validation("document must be a JSON object"))?;
        let (_id, doc) = self.insert_raw(doc)?;
        Ok(doc)
    }

    pub fn update(&mut self, id: &str, patch: serde_json::Value) -> Result<Document> {
        let patch_doc = document_from_json(patch)
            .ok_or_else(|| DbError::validation("update patch must be a JSON object"))?;
        let (_old, merged) = self.update_raw(id, patch_doc)?;
        Ok(merged)
    }

    pub fn remove(&mut self, id: &str) -> Result<Document> {
        self.remove_raw(id)
    }

    /// Every `_id` currently matching `filter`, snapshotted up front so a
    /// multi-document `update_many`/`remove_many` operates on a fixed set
    /// rather than one that can shift underneath it as it mutates.
    pub(crate) fn matching_ids(&self, filter: &Filter) -> Vec<String> {
        self.documents
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Apply `patch` to every document matching `filter`, merging shallowly
    /// just like [`Collection::update`]. Returns the merged documents in the
    /// order their ids were materialized.
    pub fn update_many(&mut self, filter: &Filter, patch: serde_json::Value) -> Result<Vec<Document>> {
        let patch_doc = document_from_json(patch)
            .ok_or_else(|| DbError::validation("update patch must be a JSON object"))?;
        let ids = self.matching_ids(filter);
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            let (_old, merged) = self.update_raw(&id, patch_doc.clone())?;
            updated.push(merged);
        }
        Ok(updated)
    }

    /// Remove every document matching `filter`. Returns the removed
    /// documents in the order their ids were materialized.
    pub fn remove_many(&mut self, filter: &Filter) -> Result<Vec<Document>> {
        let ids = self.matching_ids(filter);
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            removed.push(self.remove_raw(&id)?);
        }
        Ok(removed)
    }

    /// Like [`Collection::find_all`], but when `query` carries no sort,
    /// documents are filtered lazily without materializing the full result
    /// array. A sort requires seeing every candidate before the first
    /// document can be yielded, so a sorted query collapses to `find_all`.
    pub fn find_stream<'a>(&'a self, query: &Query) -> Box<dyn Iterator<Item = Document> + 'a> {
        if query.sort.is_empty() {
            let filter = query.filter.clone();
            let skip = query.skip;
            let limit = query.limit;
            let iter = self
                .documents
                .values()
                .filter(move |doc| filter.as_ref().map_or(true, |f| f.matches(doc)))
                .cloned()
                .skip(skip)
                .take(limit.unwrap_or(usize::MAX));
            Box::new(iter)
        } else {
            Box::new(self.find_all(query).into_iter())
        }
    }

    /// Insert a pre-parsed document, appending and flushing immediately.
    /// Used directly by [`Collection::insert`] and by
    /// [`crate::database::Database`] for autocommit writes made outside a
    /// transaction.
    pub(crate) fn insert_raw(&mut self, doc: Document) -> Result<(String, Document)> {
        let (id, doc) = self.apply_insert_local(doc)?;
        let entry = LogEntry::new(Op::Insert, self.name.clone(), id.clone())
            .with_data(doc.clone())
            .seal_if(self.checksums_enabled);
        self.storage.append(&entry)?;
        self.storage.flush()?;
        Ok((id, doc))
    }

    pub(crate) fn update_raw(&mut self, id: &str, patch: Document) -> Result<(Document, Document)> {
        let (old, merged) = self.apply_update_local(id, patch)?;
        let entry = LogEntry::new(Op::Update, self.name.clone(), id)
            .with_data(merged.clone())
            .seal_if(self.checksums_enabled);
        self.storage.append(&entry)?;
        self.storage.flush()?;
        Ok((old, merged))
    }

    pub(crate) fn remove_raw(&mut self, id: &str) -> Result<Document> {
        let old = self.apply_remove_local(id)?;
        let entry = LogEntry::new(Op::Delete, self.name.clone(), id).seal_if(self.checksums_enabled);
        self.storage.append(&entry)?;
        self.storage.flush()?;
        Ok(old)
    }

    pub fn compact(&mut self) -> Result<()> {
        self.storage.compact()
    }

    /// Wipe this collection's storage and in-memory state. Used by
    /// [`crate::database::Database::drop_collection`].
    pub fn clear(&mut self) -> Result<()> {
        self.storage.clear()?;
        self.documents.clear();
        self.indexes = IndexManager::new();
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.storage.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.storage.close()
    }

    // --- transaction-local helpers -------------------------------------
    //
    // These mutate the in-memory map and indexes exactly like the public
    // methods above, but never touch storage. `crate::database::TransactionScope`
    // calls these immediately (so reads inside the same transaction see the
    // write) and only turns them into appended log entries once the
    // transaction commits.

    pub(crate) fn apply_insert_local(&mut self, mut doc: Document) -> Result<(String, Document)> {
        let id = match doc.get(ID_FIELD).and_then(Value::as_str) {
            Some(existing) => existing.to_string(),
            None => {
                let id = Uuid::now_v7().to_string();
                doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };
        if self.documents.contains_key(&id) {
            return Err(DbError::duplicate_id(&self.name, &id));
        }
        self.indexes.index_document(&id, &doc)?;
        self.documents.insert(id.clone(), doc.clone());
        Ok((id, doc))
    }

    pub(crate) fn apply_update_local(&mut self, id: &str, patch: Document) -> Result<(Document, Document)> {
        let existing = self
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::validation(format!("no document with _id '{}'", id)))?;

        let mut merged = existing.clone();
        for (k, v) in patch {
            if k == ID_FIELD {
                continue;
            }
            merged.insert(k, v);
        }

        self.indexes.remove_document(id, &existing);
        if let Err(e) = self.indexes.index_document(id, &merged) {
            self.indexes.index_document(id, &existing).ok();
            return Err(e);
        }
        self.documents.insert(id.to_string(), merged.clone());
        Ok((existing, merged))
    }

    pub(crate) fn apply_remove_local(&mut self, id: &str) -> Result<Document> {
        let existing = self
            .documents
            .remove(id)
            .ok_or_else(|| DbError::validation(format!("no document with _id '{}'", id)))?;
        self.indexes.remove_document(id, &existing);
        Ok(existing)
    }

    pub(crate) fn revert_insert(&mut self, id: &str) {
        if let Some(doc) = self.documents.remove(id) {
            self.indexes.remove_document(id, &doc);
        }
    }

    pub(crate) fn revert_update(&mut self, id: &str, old: Document) {
        if let Some(current) = self.documents.get(id).cloned() {
            self.indexes.remove_document(id, &current);
        }
        self.indexes.index_document(id, &old).ok();
        self.documents.insert(id.to_string(), old);
    }

    pub(crate) fn revert_remove(&mut self, id: &str, old: Document) {
        self.indexes.index_document(id, &old).ok();
        self.documents.insert(id.to_string(), old);
    }

    pub(crate) fn append_committed(&mut self, entry: &LogEntry) -> Result<()> {
        self.storage.append(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortDirection;
    use crate::storage::memory::MemoryStorage;
    use serde_json::json;

    fn open_collection(name: &str) -> Collection {
        let tx = TransactionManager::new(Box::new(MemoryStorage::new()), true).unwrap();
        Collection::open(name, Box::new(MemoryStorage::new()), &tx, true).unwrap()
    }

    #[test]
    fn insert_assigns_an_id_when_missing() {
        let mut coll = open_collection("users");
        let doc = coll.insert(json!({"name": "Ada"})).unwrap();
        assert!(doc.get(ID_FIELD).is_some());
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "name": "Ada"})).unwrap();
        let result = coll.insert(json!({"_id": "1", "name": "Grace"}));
        assert!(result.is_err());
    }

    #[test]
    fn update_merges_shallowly_and_preserves_id() {
        let mut coll = open_collection("users");
        let doc = coll.insert(json!({"_id": "1", "name": "Ada", "age": 30})).unwrap();
        let id = doc.get(ID_FIELD).unwrap().as_str().unwrap().to_string();
        let updated = coll.update(&id, json!({"age": 31, "_id": "ignored"})).unwrap();
        assert_eq!(updated.get(ID_FIELD), doc.get(ID_FIELD));
        assert_eq!(updated.get("age"), Some(&Value::Number(31.0)));
        assert_eq!(updated.get("name"), Some(&Value::String("Ada".into())));
    }

    #[test]
    fn remove_deletes_and_returns_old_document() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "name": "Ada"})).unwrap();
        let removed = coll.remove("1").unwrap();
        assert_eq!(removed.get("name"), Some(&Value::String("Ada".into())));
        assert_eq!(coll.count(None), 0);
    }

    #[test]
    fn find_all_applies_filter_and_sort() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "age": 30})).unwrap();
        coll.insert(json!({"_id": "2", "age": 20})).unwrap();
        coll.insert(json!({"_id": "3", "age": 40})).unwrap();

        let query = Query::new().sort_by("age", SortDirection::Asc);
        let results = coll.find_all(&query);
        let ages: Vec<f64> = results.iter().map(|d| d.get("age").unwrap().as_f64().unwrap()).collect();
        assert_eq!(ages, vec![20.0, 30.0, 40.0]);
    }

    #[test]
    fn index_accelerated_lookup_matches_full_scan_result() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "email": "a@x.com"})).unwrap();
        coll.insert(json!({"_id": "2", "email": "b@x.com"})).unwrap();
        coll.create_index(vec!["email".to_string()], true, false).unwrap();

        let query = Query::new().with_filter(Filter::eq("email", Value::String("a@x.com".into())));
        let results = coll.find_all(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get(ID_FIELD), Some(&Value::String("1".into())));
    }

    #[test]
    fn unique_index_blocks_conflicting_insert() {
        let mut coll = open_collection("users");
        coll.create_index(vec!["email".to_string()], true, false).unwrap();
        coll.insert(json!({"_id": "1", "email": "a@x.com"})).unwrap();
        let result = coll.insert(json!({"_id": "2", "email": "a@x.com"}));
        assert!(result.is_err());
    }

    #[test]
    fn reopening_replays_committed_state() {
        let tx = TransactionManager::new(Box::new(MemoryStorage::new()), true).unwrap();
        let storage = Box::new(MemoryStorage::new());
        // Can't reuse the same boxed storage instance across opens (memory
        // backend has no file), so this test exercises replay through a
        // JSON file instead.
        drop(storage);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        {
            let mut coll = Collection::open(
                "users",
                Box::new(crate::storage::json::JsonStorage::new(&path, None)),
                &tx,
                true,
            )
            .unwrap();
            coll.insert(json!({"_id": "1", "name": "Ada"})).unwrap();
        }

        let reopened = Collection::open(
            "users",
            Box::new(crate::storage::json::JsonStorage::new(&path, None)),
            &tx,
            true,
        )
        .unwrap();
        assert_eq!(reopened.count(None), 1);
    }

    #[test]
    fn update_many_patches_every_matching_document() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "status": "pending", "age": 20})).unwrap();
        coll.insert(json!({"_id": "2", "status": "pending", "age": 30})).unwrap();
        coll.insert(json!({"_id": "3", "status": "active", "age": 40})).unwrap();

        let filter = Filter::eq("status", Value::String("pending".into()));
        let updated = coll.update_many(&filter, json!({"status": "active"})).unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(coll.count(Some(&Filter::eq("status", Value::String("active".into())))), 3);
    }

    #[test]
    fn remove_many_deletes_every_matching_document() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "age": 10})).unwrap();
        coll.insert(json!({"_id": "2", "age": 20})).unwrap();
        coll.insert(json!({"_id": "3", "age": 30})).unwrap();

        let filter = Filter::Field("age".to_string(), crate::query::FieldOp::Lt(Value::Number(25.0)));
        let removed = coll.remove_many(&filter).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(coll.count(None), 1);
    }

    #[test]
    fn find_stream_without_sort_matches_find_all() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "age": 20})).unwrap();
        coll.insert(json!({"_id": "2", "age": 30})).unwrap();

        let query = Query::new().with_filter(Filter::Field(
            "age".to_string(),
            crate::query::FieldOp::Gte(Value::Number(25.0)),
        ));
        let streamed: Vec<Document> = coll.find_stream(&query).collect();
        assert_eq!(streamed.len(), 1);
        assert_eq!(streamed[0].get(ID_FIELD), Some(&Value::String("2".into())));
    }

    #[test]
    fn find_stream_with_sort_collapses_to_find_all() {
        let mut coll = open_collection("users");
        coll.insert(json!({"_id": "1", "age": 30})).unwrap();
        coll.insert(json!({"_id": "2", "age": 20})).unwrap();

        let query = Query::new().sort_by("age", SortDirection::Asc);
        let streamed: Vec<Document> = coll.find_stream(&query).collect();
        let ages: Vec<f64> = streamed.iter().map(|d| d.get("age").unwrap().as_f64().unwrap()).collect();
        assert_eq!(ages, vec![20.0, 30.0]);
    }

    #[test]
    fn clear_empties_documents_and_indexes() {
        let mut coll = open_collection("users");
        coll.create_index(vec!["email".to_string()], true, false).unwrap();
        coll.insert(json!({"_id": "1", "email": "a@x.com"})).unwrap();
        coll.clear().unwrap();
        assert_eq!(coll.count(None), 0);
        // the unique index was reset too, so the same email can be reused.
        coll.insert(json!({"_id": "2", "email": "a@x.com"})).unwrap();
        assert_eq!(coll.count(None), 1);
    }
}
