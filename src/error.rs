//! Error types for the database.
//!
//! Defines a unified error type that can represent failures from every
//! component: storage I/O, checksum/container corruption, encryption,
//! file locking, transaction misuse, and document validation.

use std::fmt;
use std::io;

/// Unified error type for all database operations.
#[derive(Debug)]
pub enum DbError {
    /// I/O error (file operations).
    Io(io::Error),
    /// Bad configuration, duplicate id, unique-index violation.
    Validation(String),
    /// Checksum mismatch, magic mismatch, unparseable container header.
    Corruption(String),
    /// Authenticated-encryption failure (tag mismatch, malformed envelope).
    Crypto(String),
    /// File lock could not be acquired within its retry budget.
    Lock(String),
    /// Transaction id unknown, or transaction not in the expected state.
    Transaction(String),
    /// Reserved for multi-writer contention; unused by the current engine.
    Concurrency(String),
    /// JSON encode/decode failure.
    Json(String),
}

impl DbError {
    /// Stable, machine-readable error code for the boundary described in
    /// the external interface spec.
    pub fn code(&self) -> &'static str {
        match self {
            DbError::Io(_) => "ERR_IO",
            DbError::Validation(_) => "ERR_VALIDATION",
            DbError::Corruption(_) => "ERR_CORRUPTION",
            DbError::Crypto(_) => "ERR_CRYPTO",
            DbError::Lock(_) => "ERR_LOCK",
            DbError::Transaction(_) => "ERR_TRANSACTION",
            DbError::Concurrency(_) => "ERR_CONCURRENCY",
            DbError::Json(_) => "ERR_JSON",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DbError::Validation(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        DbError::Corruption(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        DbError::Crypto(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        DbError::Lock(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        DbError::Transaction(msg.into())
    }

    pub fn duplicate_id(collection: &str, id: &str) -> Self {
        DbError::Validation(format!(
            "duplicate _id '{}' in collection '{}'",
            id, collection
        ))
    }

    pub fn unique_violation(index_name: &str, collection: &str) -> Self {
        DbError::Validation(format!(
            "unique index '{}' on collection '{}' would be violated",
            index_name, collection
        ))
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Io(e) => write!(f, "io error: {}", e),
            DbError::Validation(msg) => write!(f, "validation error: {}", msg),
            DbError::Corruption(msg) => write!(f, "corruption error: {}", msg),
            DbError::Crypto(msg) => write!(f, "crypto error: {}", msg),
            DbError::Lock(msg) => write!(f, "lock error: {}", msg),
            DbError::Transaction(msg) => write!(f, "transaction error: {}", msg),
            DbError::Concurrency(msg) => write!(f, "concurrency error: {}", msg),
            DbError::Json(msg) => write!(f, "json error: {}", msg),
        }
    }
}

impl std::error::Error for DbError {}

impl From<io::Error> for DbError {
    fn from(e: io::Error) -> Self {
        DbError::Io(e)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Json(e.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DbError::validation("x").code(), "ERR_VALIDATION");
        assert_eq!(DbError::corruption("x").code(), "ERR_CORRUPTION");
        assert_eq!(DbError::crypto("x").code(), "ERR_CRYPTO");
        assert_eq!(DbError::lock("x").code(), "ERR_LOCK");
        assert_eq!(DbError::transaction("x").code(), "ERR_TRANSACTION");
    }

    #[test]
    fn duplicate_id_message() {
        let e = DbError::duplicate_id("users", "abc");
        assert!(e.to_string().contains("users"));
        assert!(e.to_string().contains("abc"));
    }

    #[test]
    fn io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let db_err: DbError = io_err.into();
        assert_eq!(db_err.code(), "ERR_IO");
    }
}
