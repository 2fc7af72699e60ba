//! In-memory storage backend. Nothing survives process exit; exists for
//! tests and ephemeral caches.

use crate::error::Result;
use crate::log_entry::{LogEntry, Op};
use crate::storage::Storage;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Vec<LogEntry>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn append(&mut self, entry: &LogEntry) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn read_stream(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries.clone())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        self.entries = crate::storage::compact_entries(self.entries.drain(..));
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(op: Op, id: &str) -> LogEntry {
        LogEntry::new(op, "users", id).with_data(BTreeMap::new()).seal()
    }

    #[test]
    fn append_and_read_preserves_order() {
        let mut storage = MemoryStorage::new();
        storage.initialize().unwrap();
        storage.append(&entry(Op::Insert, "1")).unwrap();
        storage.append(&entry(Op::Insert, "2")).unwrap();
        let entries = storage.read_stream().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "1");
        assert_eq!(entries[1].id, "2");
    }

    #[test]
    fn compact_collapses_updates_and_drops_deleted() {
        let mut storage = MemoryStorage::new();
        storage.append(&entry(Op::Insert, "1")).unwrap();
        storage.append(&entry(Op::Update, "1")).unwrap();
        storage.append(&entry(Op::Insert, "2")).unwrap();
        storage.append(&entry(Op::Delete, "2")).unwrap();
        storage.compact().unwrap();
        let entries = storage.read_stream().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "1");
        assert_eq!(entries[0].op, Op::Update);
    }

    /// Regression test for a prior bug where a delete's stale position
    /// bookkeeping corrupted the index for a key recorded after it.
    #[test]
    fn compact_handles_update_after_a_preceding_delete() {
        let mut storage = MemoryStorage::new();
        storage.append(&entry(Op::Insert, "a")).unwrap();
        storage.append(&entry(Op::Insert, "b")).unwrap();
        storage.append(&entry(Op::Delete, "a")).unwrap();
        storage.append(&entry(Op::Update, "b")).unwrap();
        storage.compact().unwrap();
        let entries = storage.read_stream().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "b");
        assert_eq!(entries[0].op, Op::Update);
    }

    #[test]
    fn clear_empties_the_log() {
        let mut storage = MemoryStorage::new();
        storage.append(&entry(Op::Insert, "1")).unwrap();
        storage.clear().unwrap();
        assert!(storage.read_stream().unwrap().is_empty());
    }
}
