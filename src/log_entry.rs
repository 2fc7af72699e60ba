//! Log entry — the unit every storage backend appends, one per document
//! mutation or transaction boundary marker.
//!
//! Mirrors the teacher engine's `LogRecord`/`LogOperation` split (an
//! envelope plus a tagged operation) but carries a document payload instead
//! of column values, and a self-contained checksum instead of relying on an
//! LSN-ordered WAL file for integrity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::value::Document;

/// What a [`LogEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    Rollback,
}

impl Op {
    /// Transaction envelope entries (`Begin`/`Commit`/`Rollback`) are
    /// checksummed leniently: a corrupt envelope entry is skipped with a
    /// warning rather than aborting a whole replay, since it marks a
    /// transaction boundary rather than data a reader could silently get
    /// wrong.
    pub fn is_envelope(&self) -> bool {
        matches!(self, Op::Begin | Op::Commit | Op::Rollback)
    }
}

/// A single appended record. `data` carries the post-image document for
/// `Insert`/`Update`, and is `None` for `Delete` and every envelope op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub op: Op,
    pub collection: String,
    /// Document `_id`; empty string for envelope entries that don't scope
    /// to a single document.
    pub id: String,
    pub data: Option<Document>,
    /// SHA-256 hex digest of this entry with `checksum` itself cleared.
    /// `None` until [`LogEntry::with_checksum`] has been called.
    pub checksum: Option<String>,
    pub timestamp: u64,
    pub tx_id: Option<String>,
}

impl LogEntry {
    pub fn new(op: Op, collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            op,
            collection: collection.into(),
            id: id.into(),
            data: None,
            checksum: None,
            timestamp: now_millis(),
            tx_id: None,
        }
    }

    pub fn with_data(mut self, data: Document) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_tx_id(mut self, tx_id: impl Into<String>) -> Self {
        self.tx_id = Some(tx_id.into());
        self
    }

    /// Compute this entry's checksum over its canonical JSON encoding with
    /// `checksum` cleared, and store the result. `Document`'s `BTreeMap`
    /// backing guarantees this encoding is stable across processes.
    pub fn seal(mut self) -> Self {
        self.checksum = None;
        let digest = Self::digest(&self);
        self.checksum = Some(digest);
        self
    }

    /// Like [`LogEntry::seal`], but a no-op when `enabled` is false —
    /// wires `DatabaseConfig::enable_checksums` through without a branch at
    /// every call site.
    pub fn seal_if(self, enabled: bool) -> Self {
        if enabled {
            self.seal()
        } else {
            self
        }
    }

    /// Verify this entry's stored checksum against a freshly computed one.
    /// Entries with no checksum (e.g. written before checksums were
    /// enabled) are treated as unverifiable, not corrupt.
    pub fn verify(&self) -> bool {
        match &self.checksum {
            None => true,
            Some(stored) => {
                let mut unsealed = self.clone();
                unsealed.checksum = None;
                &Self::digest(&unsealed) == stored
            }
        }
    }

    fn digest(entry: &LogEntry) -> String {
        // serde_json's map serialization follows BTreeMap's key order, and
        // Document is itself a BTreeMap, so this is deterministic.
        let bytes = serde_json::to_vec(entry).expect("LogEntry always serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn seal_then_verify_succeeds() {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), crate::value::Value::String("a".into()));
        let entry = LogEntry::new(Op::Insert, "users", "1")
            .with_data(data)
            .seal();
        assert!(entry.verify());
    }

    #[test]
    fn tampering_with_data_breaks_verification() {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), crate::value::Value::String("a".into()));
        let mut entry = LogEntry::new(Op::Insert, "users", "1")
            .with_data(data)
            .seal();
        entry.data = Some(BTreeMap::new());
        assert!(!entry.verify());
    }

    #[test]
    fn envelope_ops_are_flagged() {
        assert!(Op::Begin.is_envelope());
        assert!(Op::Commit.is_envelope());
        assert!(Op::Rollback.is_envelope());
        assert!(!Op::Insert.is_envelope());
        assert!(!Op::Delete.is_envelope());
    }

    #[test]
    fn missing_checksum_is_treated_as_unverifiable_not_corrupt() {
        let entry = LogEntry::new(Op::Delete, "users", "1");
        assert!(entry.checksum.is_none());
        assert!(entry.verify());
    }
}
