//! Append-only log (AOL) storage backend.
//!
//! Every entry is appended as one NDJSON line. A dedicated writer thread
//! owns the file handle and drains a bounded mailbox — the same
//! single-purpose-worker-thread shape the teacher engine uses for its WAL.
//! Appended entries sit in the worker's in-memory buffer until either the
//! buffer reaches `buffer_size` or the caller calls `flush()`/`close()`;
//! either event writes every buffered line and `fsync`'s the file before
//! acknowledging. A caller's `flush()` blocks until that has happened, so
//! durability is exactly what `flush()` promises — `append()` alone only
//! guarantees the entry is either on disk or sitting in the buffer, at most
//! `buffer_size - 1` entries behind.
//!
//! Checksum handling is asymmetric by design: a corrupt data entry
//! (`Insert`/`Update`/`Delete`) aborts the whole replay, since silently
//! dropping it could resurrect or lose a document. A corrupt transaction
//! envelope entry (`Begin`/`Commit`/`Rollback`) is skipped with a warning —
//! it only marks a boundary, and the data entries around it are still
//! individually verified.
//!
//! When a [`CryptoVault`] is configured, each line is independently
//! encrypted: the line holds the JSON-serialized [`EncryptedPayload`] for
//! that one entry rather than the entry itself. This is what lets a single
//! corrupt or truncated line be skipped without needing to decrypt (or even
//! locate) every other line around it — unlike `JsonStorage`/`BinaryStorage`,
//! where encryption wraps the whole file and a bad key loses the whole
//! snapshot. A line that fails to decrypt (wrong password, tampered bytes)
//! is skipped with a warning, the per-record analogue of the whole-state
//! empty-start behavior those whole-file backends fall back to.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use crate::crypto::{CryptoVault, EncryptedPayload};
use crate::error::{DbError, Result};
use crate::log_entry::LogEntry;
use crate::storage::Storage;

enum Message {
    Append(LogEntry, mpsc::SyncSender<Result<()>>),
    Flush(mpsc::SyncSender<Result<()>>),
    Shutdown(mpsc::SyncSender<Result<()>>),
}

struct WorkerHandle {
    sender: mpsc::SyncSender<Message>,
}

impl WorkerHandle {
    fn spawn(file: File, buffer_size: usize, vault: Option<CryptoVault>) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Message>(1024);
        thread::spawn(move || worker_loop(file, rx, buffer_size.max(1), vault));
        Self { sender: tx }
    }

    fn append(&self, entry: LogEntry) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.sender
            .send(Message::Append(entry, tx))
            .map_err(|_| DbError::Io(closed_channel()))?;
        rx.recv().map_err(|_| DbError::Io(closed_channel()))?
    }

    fn flush(&self) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.sender
            .send(Message::Flush(tx))
            .map_err(|_| DbError::Io(closed_channel()))?;
        rx.recv().map_err(|_| DbError::Io(closed_channel()))?
    }

    fn shutdown(&self) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        if self.sender.send(Message::Shutdown(tx)).is_err() {
            return Ok(());
        }
        rx.recv().unwrap_or(Ok(()))
    }
}

fn closed_channel() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "aol worker thread is gone")
}

/// Serialize one entry to the line that belongs on disk: its bare JSON when
/// no vault is configured, or the JSON of its [`EncryptedPayload`] envelope
/// when one is.
fn serialize_line(entry: &LogEntry, vault: Option<&CryptoVault>) -> Result<String> {
    let plain = serde_json::to_string(entry)?;
    match vault {
        None => Ok(plain),
        Some(vault) => Ok(serde_json::to_string(&vault.encrypt(&plain)?)?),
    }
}

/// Write every buffered entry as an NDJSON line and `fsync` the file,
/// clearing the buffer on success. This is the only place bytes reach disk.
fn write_and_sync(file: &mut File, buffer: &mut Vec<LogEntry>, vault: Option<&CryptoVault>) -> Result<()> {
    for entry in buffer.drain(..) {
        let line = serialize_line(&entry, vault)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.sync_data()?;
    Ok(())
}

fn worker_loop(mut file: File, rx: mpsc::Receiver<Message>, buffer_size: usize, vault: Option<CryptoVault>) {
    let mut buffer: Vec<LogEntry> = Vec::with_capacity(buffer_size);
    while let Ok(msg) = rx.recv() {
        match msg {
            Message::Append(entry, responder) => {
                buffer.push(entry);
                let result = if buffer.len() >= buffer_size {
                    write_and_sync(&mut file, &mut buffer, vault.as_ref())
                } else {
                    Ok(())
                };
                if let Err(e) = &result {
                    log::warn!("aol buffered write failed: {}", e);
                }
                let _ = responder.send(result);
            }
            Message::Flush(responder) => {
                let result = write_and_sync(&mut file, &mut buffer, vault.as_ref());
                if let Err(e) = &result {
                    log::warn!("aol fsync failed: {}", e);
                }
                let _ = responder.send(result);
            }
            Message::Shutdown(responder) => {
                let result = write_and_sync(&mut file, &mut buffer, vault.as_ref());
                let _ = responder.send(result);
                break;
            }
        }
    }
}

/// Default write-buffer threshold, matching `DatabaseConfig::default().buffer_size`.
const DEFAULT_BUFFER_SIZE: usize = 100;

pub struct AolStorage {
    path: PathBuf,
    buffer_size: usize,
    vault: Option<CryptoVault>,
    worker: Option<WorkerHandle>,
    cached_entries: Vec<LogEntry>,
}

impl AolStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_buffer_size(path, DEFAULT_BUFFER_SIZE)
    }

    /// Build an AOL backend whose writer thread batches up to `buffer_size`
    /// entries (per `DatabaseConfig::buffer_size`) before an implicit flush.
    pub fn with_buffer_size(path: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self::with_options(path, buffer_size, None)
    }

    /// Build an AOL backend that encrypts each line independently through
    /// `vault`, if given.
    pub fn with_options(path: impl Into<PathBuf>, buffer_size: usize, vault: Option<CryptoVault>) -> Self {
        Self {
            path: path.into(),
            buffer_size: buffer_size.max(1),
            vault,
            worker: None,
            cached_entries: Vec::new(),
        }
    }

    /// Decode one on-disk line back into a [`LogEntry`], decrypting it first
    /// if a vault is configured. Returns `Ok(None)` for a line that should be
    /// skipped (corrupt envelope checksum, or a line that failed to decrypt)
    /// rather than abort the whole load.
    fn decode_line(&self, line_no: usize, line: &str) -> Result<Option<LogEntry>> {
        let plain = match &self.vault {
            None => line.to_string(),
            Some(vault) => {
                let payload: EncryptedPayload = serde_json::from_str(line).map_err(|e| {
                    DbError::corruption(format!("malformed aol line {}: {}", line_no + 1, e))
                })?;
                match vault.decrypt(&payload) {
                    Ok(plaintext) => plaintext,
                    Err(DbError::Crypto(msg)) => {
                        log::warn!(
                            "skipping aol line {} that failed to decrypt ({})",
                            line_no + 1,
                            msg
                        );
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let entry: LogEntry = serde_json::from_str(&plain).map_err(|e| {
            DbError::corruption(format!("malformed aol line {}: {}", line_no + 1, e))
        })?;

        if !entry.verify() {
            if entry.op.is_envelope() {
                log::warn!(
                    "skipping corrupt transaction envelope entry at line {} (checksum mismatch)",
                    line_no + 1
                );
                return Ok(None);
            }
            return Err(DbError::corruption(format!(
                "checksum mismatch at line {}: data is corrupt",
                line_no + 1
            )));
        }
        Ok(Some(entry))
    }

    fn load_existing(&self) -> Result<Vec<LogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(entry) = self.decode_line(line_no, &line)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

impl Storage for AolStorage {
    fn initialize(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.cached_entries = self.load_existing()?;
        log::info!(
            "loaded {} entries from {:?}",
            self.cached_entries.len(),
            self.path
        );

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.worker = Some(WorkerHandle::spawn(file, self.buffer_size, self.vault.clone()));
        Ok(())
    }

    fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| DbError::validation("aol storage not initialized"))?;
        worker.append(entry.clone())?;
        self.cached_entries.push(entry.clone());
        Ok(())
    }

    fn read_stream(&self) -> Result<Vec<LogEntry>> {
        Ok(self.cached_entries.clone())
    }

    fn flush(&mut self) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            worker.shutdown()?;
        }
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        self.cached_entries = crate::storage::compact_entries(self.cached_entries.drain(..));

        self.close()?;
        let tmp_path = {
            let mut p = self.path.clone();
            let file_name = p
                .file_name()
                .map(|n| format!("{}.compact.tmp", n.to_string_lossy()))
                .unwrap_or_else(|| "aol.compact.tmp".to_string());
            p.set_file_name(file_name);
            p
        };
        {
            let mut f = File::create(&tmp_path)?;
            for entry in &self.cached_entries {
                let line = serialize_line(entry, self.vault.as_ref())?;
                f.write_all(line.as_bytes())?;
                f.write_all(b"\n")?;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.worker = Some(WorkerHandle::spawn(file, self.buffer_size, self.vault.clone()));
        log::info!("compacted aol to {} entries at {:?}", self.cached_entries.len(), self.path);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.cached_entries.clear();
        self.close()?;
        fs::write(&self.path, b"")?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.worker = Some(WorkerHandle::spawn(file, self.buffer_size, self.vault.clone()));
        Ok(())
    }
}

impl Drop for AolStorage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
