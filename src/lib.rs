//! An embedded, single-process document database.
//!
//! A [`Database`] owns one or more named [`Collection`]s, each backed by a
//! pluggable [`storage`] engine (in-memory, JSON snapshot, binary snapshot,
//! or append-only log). Documents are schemaless JSON objects with a
//! reserved `_id` field; [`query`] provides a MongoDB-shaped filter
//! language over them. Multi-document writes can be grouped into a single
//! atomic unit with [`Database::transaction`].
//!
//! ```no_run
//! use lmcs::{Database, DatabaseConfig};
//! use serde_json::json;
//!
//! # fn main() -> lmcs::error::Result<()> {
//! let mut db = Database::open(DatabaseConfig::default())?;
//! db.insert("users", json!({"name": "Ada Lovelace"}))?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod index;
pub mod lock;
pub mod log_entry;
pub mod query;
pub mod storage;
pub mod transaction;
pub mod value;

pub use collection::Collection;
pub use config::{DatabaseConfig, StorageType};
pub use database::{Database, DatabaseStats};
pub use error::{DbError, Result};
pub use query::{Filter, Query, SortDirection};
pub use value::{Document, Value};
