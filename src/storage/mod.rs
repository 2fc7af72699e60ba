//! Storage backends.
//!
//! A collection is backed by one [`Storage`] implementation, chosen by
//! [`crate::config::StorageType`]. Every backend speaks the same append-only
//! log of [`LogEntry`] records; what differs is how (and whether) that log
//! is made durable and how it's represented on disk.

pub mod aol;
pub mod binary;
pub mod json;
pub mod memory;

use std::collections::HashMap;

use crate::error::Result;
use crate::log_entry::{LogEntry, Op};

/// Validate a collection/file name so it can't escape the configured data
/// directory.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(crate::error::DbError::validation("name cannot be empty"));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(crate::error::DbError::validation(format!(
            "invalid name '{}': contains forbidden characters",
            name
        )));
    }
    Ok(())
}

/// Collapse a sequence of log entries to the minimal current-state
/// representation: the last `Insert`/`Update` per `(collection, id)`, with
/// deleted keys dropped and transaction envelope entries ignored. Shared by
/// every backend's `compact()` so the bookkeeping only has to be gotten
/// right once.
///
/// `index` maps a key to its position in `latest`. A naive `Vec::retain` on
/// delete leaves every position recorded *after* the removed slot stale, so
/// deletion here uses `swap_remove` instead and fixes up the one entry that
/// move displaces (the one the remove pulled in from the end of the vec).
pub fn compact_entries(entries: impl IntoIterator<Item = LogEntry>) -> Vec<LogEntry> {
    let mut latest: Vec<LogEntry> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for entry in entries {
        if entry.op.is_envelope() {
            continue;
        }
        let key = (entry.collection.clone(), entry.id.clone());
        match entry.op {
            Op::Delete => {
                if let Some(pos) = index.remove(&key) {
                    let last_idx = latest.len() - 1;
                    latest.swap_remove(pos);
                    if pos != last_idx {
                        let moved = &latest[pos];
                        let moved_key = (moved.collection.clone(), moved.id.clone());
                        index.insert(moved_key, pos);
                    }
                }
            }
            Op::Insert | Op::Update => {
                if let Some(&pos) = index.get(&key) {
                    latest[pos] = entry;
                } else {
                    index.insert(key, latest.len());
                    latest.push(entry);
                }
            }
            Op::Begin | Op::Commit | Op::Rollback => unreachable!("filtered above"),
        }
    }
    latest
}

/// Append-only backing store for one collection's log entries.
///
/// Implementors decide what "durable" means: [`memory::MemoryStorage`]
/// never is, [`json::JsonStorage`] and [`binary::BinaryStorage`] rewrite a
/// whole snapshot on flush, and [`aol::AolStorage`] appends each entry and
/// treats an explicit `flush()` as the fsync boundary.
pub trait Storage: Send {
    /// Open (creating if absent) and load whatever state already exists.
    fn initialize(&mut self) -> Result<()>;

    /// Append one entry. Whether this is durable before the next `flush()`
    /// is backend-specific.
    fn append(&mut self, entry: &LogEntry) -> Result<()>;

    /// Return every entry currently known to the backend, in the order
    /// needed to reconstruct collection state (oldest first).
    fn read_stream(&self) -> Result<Vec<LogEntry>>;

    /// Force all buffered state to stable storage.
    fn flush(&mut self) -> Result<()>;

    /// Release any resources (file handles, worker threads) held by this
    /// backend. A backend must tolerate being dropped without `close()`
    /// having been called.
    fn close(&mut self) -> Result<()>;

    /// Collapse the log to its minimal current-state representation.
    /// Backends with nothing to collapse (memory, full-snapshot backends)
    /// accept the default no-op.
    fn compact(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discard all data. Used by tests and by `Database::drop_collection`.
    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}
