//! Binary snapshot storage backend.
//!
//! On-disk layout is a single framed container:
//!
//! ```text
//! [4 bytes u32 BE header_len][header_len bytes JSON header]
//! [4 bytes u32 BE payload_len][payload_len bytes JSON payload]
//! ```
//!
//! The header is `{magic, version, checksum, encrypted}`: `magic` identifies
//! the format, `version` is the format revision, and `checksum` is a SHA-256
//! hex digest of the (post-encryption, if any) payload bytes, so a truncated
//! or bit-flipped file is caught on read rather than silently deserialized
//! into garbage.
//!
//! The payload itself is plain JSON (the entry array's canonical encoding,
//! or the JSON-serialized [`EncryptedPayload`] envelope when a password is
//! configured) — only the header framing is binary. This keeps the
//! container's payload format identical to [`crate::storage::json::JsonStorage`]'s
//! file body, so the two backends differ only in how they frame and
//! checksum that body, not in what it contains.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{CryptoVault, EncryptedPayload};
use crate::error::{DbError, Result};
use crate::log_entry::LogEntry;
use crate::storage::Storage;

const MAGIC: &str = "LMCS";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ContainerHeader {
    magic: String,
    version: u32,
    checksum: String,
    encrypted: bool,
}

pub struct BinaryStorage {
    path: PathBuf,
    vault: Option<CryptoVault>,
    entries: Vec<LogEntry>,
}

impl BinaryStorage {
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
            .unwrap_or_else(|| "snapshot.bin.tmp".to_string());
        p.set_file_name(file_name);
        p
    }

    fn checksum(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn read_container(&self) -> Result<Vec<LogEntry>> {
        let mut file = fs::File::open(&self.path)?;

        let header_len = read_u32(&mut file)? as usize;
        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)
            .map_err(|_| DbError::corruption("truncated container header"))?;
        let header: ContainerHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| DbError::corruption(format!("malformed container header: {}", e)))?;

        if header.magic != MAGIC {
            return Err(DbError::corruption("bad magic: not an lmcs binary snapshot"));
        }
        if header.version != FORMAT_VERSION {
            return Err(DbError::corruption(format!(
                "unsupported binary snapshot version {}",
                header.version
            )));
        }

        let payload_len = read_u32(&mut file)? as usize;
        let mut payload = vec![0u8; payload_len];
        file.read_exact(&mut payload)
            .map_err(|_| DbError::corruption("truncated container payload"))?;

        if Self::checksum(&payload) != header.checksum {
            return Err(DbError::corruption(
                "payload checksum mismatch: snapshot is corrupt",
            ));
        }

        let plain = if header.encrypted {
            let vault = self
                .vault
                .as_ref()
                .ok_or_else(|| DbError::crypto("snapshot is encrypted but no password was configured"))?;
            let payload: EncryptedPayload = serde_json::from_slice(&payload).map_err(|e| {
                DbError::corruption(format!("malformed encrypted payload: {}", e))
            })?;
            vault.decrypt(&payload)?.into_bytes()
        } else {
            payload
        };

        serde_json::from_slice(&plain)
            .map_err(|e| DbError::corruption(format!("malformed entry list: {}", e)))
    }
}

fn read_u32(file: &mut fs::File) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|_| DbError::corruption("truncated length prefix"))?;
    Ok(u32::from_be_bytes(buf))
}

impl Storage for BinaryStorage {
    fn initialize(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            return Ok(());
        }
        match self.read_container() {
            Ok(entries) => {
                self.entries = entries;
                log::info!("loaded {} entries from {:?}", self.entries.len(), self.path);
            }
            Err(DbError::Crypto(msg)) => {
                log::warn!(
                    "decrypting {:?} failed ({}); starting from an empty state",
                    self.path,
                    msg
                );
                self.entries = Vec::new();
            }
            Err(e) => return Err(e),
        }
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
        let plain = serde_json::to_vec(&self.entries)?;

        let (payload, encrypted) = match &self.vault {
            None => (plain, false),
            Some(vault) => {
                let plain_str = String::from_utf8_lossy(&plain).into_owned();
                let sealed = vault.encrypt(&plain_str)?;
                let sealed_bytes = serde_json::to_vec(&sealed)?;
                (sealed_bytes, true)
            }
        };

        let header = ContainerHeader {
            magic: MAGIC.to_string(),
            version: FORMAT_VERSION,
            checksum: Self::checksum(&payload),
            encrypted,
        };
        let header_bytes = serde_json::to_vec(&header)?;

        let mut out = Vec::with_capacity(4 + header_bytes.len() + payload.len() + 4);
        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);

        let tmp = self.temp_path();
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&out)?;
            f.sync_all()?;
        }
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
