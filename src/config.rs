//! Database configuration.
//!
//! [`DatabaseConfig`] gathers everything that a [`crate::database::Database`]
//! needs to pick a storage backend and tune its durability/compaction
//! behavior. Every field has a spec-mandated default, mirroring the way
//! `SandstoneConfig` pairs a `Default` impl with named presets.

use std::path::PathBuf;

use crate::error::{DbError, Result};

/// Which on-disk (or in-memory) backend a collection's documents live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Nothing survives process exit; useful for tests and caches.
    Memory,
    /// A single JSON array snapshotted to disk on every flush.
    Json,
    /// A framed, checksummed binary snapshot container.
    Binary,
    /// An append-only log of operations, replayed on open.
    Aol,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Memory => "memory",
            StorageType::Json => "json",
            StorageType::Binary => "binary",
            StorageType::Aol => "aol",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "memory" => Some(StorageType::Memory),
            "json" => Some(StorageType::Json),
            "binary" => Some(StorageType::Binary),
            "aol" => Some(StorageType::Aol),
            _ => None,
        }
    }
}

/// Top-level configuration for a [`crate::database::Database`] instance.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Which backend to open collections with.
    pub storage_type: StorageType,
    /// Directory collections' data files live under.
    pub custom_path: PathBuf,
    /// Verify (and, for data entries, enforce) per-entry checksums on read.
    pub enable_checksums: bool,
    /// Password for at-rest encryption; `None` disables it entirely.
    pub encryption_password: Option<String>,
    /// Number of buffered AOL entries the writer thread batches before a
    /// forced flush, independent of any explicit `flush()` call.
    pub buffer_size: usize,
    /// How often the AOL backend self-compacts, in milliseconds. `0` disables
    /// automatic compaction.
    pub compaction_interval_ms: u64,
    /// How often the JSON/binary backends autosave a snapshot, in
    /// milliseconds. `0` disables the timer; callers must flush explicitly.
    pub autosave_interval_ms: u64,
    /// File-lock acquisition retry budget when opening the database.
    pub lock_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Json,
            custom_path: PathBuf::from("./lmcs-data"),
            enable_checksums: true,
            encryption_password: None,
            buffer_size: 100,
            compaction_interval_ms: 60_000,
            autosave_interval_ms: 5_000,
            lock_retries: 5,
        }
    }
}

impl DatabaseConfig {
    /// Build a config with all defaults except the backend, the common case
    /// when a caller only cares about durability semantics and not tuning.
    pub fn with_storage_type(storage_type: StorageType) -> Self {
        Self {
            storage_type,
            ..Default::default()
        }
    }

    /// In-process, nothing-persisted configuration for tests and caches.
    pub fn in_memory() -> Self {
        Self {
            storage_type: StorageType::Memory,
            ..Default::default()
        }
    }

    /// A config tuned for write-heavy workloads: bigger buffer, less
    /// frequent compaction, matching the teacher engine's "high throughput"
    /// preset shape.
    pub fn high_throughput(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_type: StorageType::Aol,
            custom_path: path.into(),
            buffer_size: 500,
            compaction_interval_ms: 300_000,
            autosave_interval_ms: 0,
            ..Default::default()
        }
    }

    /// A config tuned for minimal data-loss window: small buffer, frequent
    /// compaction and autosave.
    pub fn low_latency(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_type: StorageType::Aol,
            custom_path: path.into(),
            buffer_size: 10,
            compaction_interval_ms: 10_000,
            autosave_interval_ms: 1_000,
            ..Default::default()
        }
    }

    /// Enable at-rest encryption with `key`. Validated here rather than left
    /// for `Database::open` to discover: an empty key is rejected up front
    /// instead of silently producing a vault nobody can decrypt without.
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(DbError::validation("encryption key cannot be empty"));
        }
        self.encryption_password = Some(key);
        Ok(self)
    }

    /// Override the AOL writer thread's buffer threshold.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}
