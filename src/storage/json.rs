//! JSON snapshot storage backend.
//!
//! The whole log lives in memory as a `Vec<LogEntry>`; `flush()` serializes
//! it to a single JSON array and writes it with the teacher's
//! write-to-temp-then-rename pattern so a crash mid-write never leaves a
//! half-written file where the real one used to be. Optionally the whole
//! file body is passed through a [`CryptoVault`] before it touches disk.

use std::fs;
use std::path::PathBuf;

use crate::crypto::{CryptoVault, EncryptedPayload};
use crate::error::{DbError, Result};
use crate::log_entry::LogEntry;
use crate::storage::Storage;

pub struct JsonStorage {
    path: PathBuf,
    vault: Option<CryptoVault>,
    entries: Vec<LogEntry>,
}

impl JsonStorage {
    pub fn new(path: impl Into<PathBuf>, vault: Option<CryptoVault>) -> Self {
        Self {
            path: path.into(),
            vault,
            entries: Vec::new(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut p = self.path.clone();
        let file_name = p
            .file_name()
            .map(|n| format!("{}.tmp", n.to_string_lossy()))
            .unwrap_or_else(|| "snapshot.json.tmp".to_string());
        p.set_file_name(file_name);
        p
    }

    fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.entries)?)
    }
}

impl Storage for JsonStorage {
    fn initialize(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            return Ok(());
        }

        let raw = fs::read_to_string(&self.path)?;
        let body = match &self.vault {
            None => raw,
            Some(vault) => {
                let payload: EncryptedPayload = match serde_json::from_str(&raw) {
                    Ok(p) => p,
                    Err(e) => {
                        return Err(DbError::corruption(format!("malformed encrypted envelope: {}", e)));
                    }
                };
                match vault.decrypt(&payload) {
                    Ok(plaintext) => plaintext,
                    Err(DbError::Crypto(msg)) => {
                        log::warn!(
                            "decrypting {:?} failed ({}); starting from an empty state",
                            self.path,
                            msg
                        );
                        self.entries = Vec::new();
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.entries = serde_json::from_str(&body)
            .map_err(|e| DbError::corruption(format!("malformed json snapshot: {}", e)))?;
        log::info!("loaded {} entries from {:?}", self.entries.len(), self.path);
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
        let body = self.serialize()?;
        let on_disk = match &self.vault {
            None => body,
            Some(vault) => serde_json::to_string(&vault.encrypt(&body)?)?,
        };

        let tmp = self.temp_path();
        fs::write(&tmp, on_disk)?;
        fs::rename(&tmp, &self.path)?;
        log::debug!("flushed {} entries to {:?}", self.entries.len(), self.path);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }

    fn compact(&mut self) -> Result<()> {
        self.entries = crate::storage::compact_entries(self.entries.drain(..));
        self.flush()
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::log_entry::Op;
    use tempfile::tempdir;

    fn entry(op: Op, id: &str) -> LogEntry {
        LogEntry::new(op, "users", id).with_data(BTreeMap::new()).seal()
    }

    #[test]
    fn flush_then_reload_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");

        let mut storage = JsonStorage::new(&path, None);
        storage.initialize().unwrap();
        storage.append(&entry(Op::Insert, "1")).unwrap();
        storage.flush().unwrap();

        let mut reloaded = JsonStorage::new(&path, None);
        reloaded.initialize().unwrap();
        assert_eq!(reloaded.read_stream().unwrap().len(), 1);
    }

    #[test]
    fn encrypted_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");

        let mut storage = JsonStorage::new(&path, Some(CryptoVault::new("secret")));
        storage.initialize().unwrap();
        storage.append(&entry(Op::Insert, "1")).unwrap();
        storage.flush().unwrap();

        let right = JsonStorage::new(&path, Some(CryptoVault::new("secret")));
        let mut right = right;
        right.initialize().unwrap();
        assert_eq!(right.read_stream().unwrap().len(), 1);
    }

    #[test]
    fn wrong_password_starts_from_empty_state_rather_than_erroring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");

        let mut storage = JsonStorage::new(&path, Some(CryptoVault::new("secret")));
        storage.initialize().unwrap();
        storage.append(&entry(Op::Insert, "1")).unwrap();
        storage.flush().unwrap();

        let mut wrong = JsonStorage::new(&path, Some(CryptoVault::new("wrong")));
        wrong.initialize().unwrap();
        assert!(wrong.read_stream().unwrap().is_empty());
    }

    #[test]
    fn compact_drops_superseded_and_deleted_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        let mut storage = JsonStorage::new(&path, None);
        storage.initialize().unwrap();
        storage.append(&entry(Op::Insert, "1")).unwrap();
        storage.append(&entry(Op::Update, "1")).unwrap();
        storage.append(&entry(Op::Insert, "2")).unwrap();
        storage.append(&entry(Op::Delete, "2")).unwrap();
        storage.compact().unwrap();
        assert_eq!(storage.read_stream().unwrap().len(), 1);
    }

    #[test]
    fn compact_handles_update_after_a_preceding_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        let mut storage = JsonStorage::new(&path, None);
        storage.initialize().unwrap();
        storage.append(&entry(Op::Insert, "a")).unwrap();
        storage.append(&entry(Op::Insert, "b")).unwrap();
        storage.append(&entry(Op::Delete, "a")).unwrap();
        storage.append(&entry(Op::Update, "b")).unwrap();
        storage.compact().unwrap();
        let entries = storage.read_stream().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "b");
    }

    #[test]
    fn missing_file_initializes_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let mut storage = JsonStorage::new(&path, None);
        storage.initialize().unwrap();
        assert!(storage.read_stream().unwrap().is_empty());
    }
}
