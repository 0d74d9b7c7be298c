//! Persistent, change-aware file index.
//!
//! The index remembers, for every path ever scanned, the modification time
//! and content digest observed at the time, plus merge bookkeeping once the
//! path has been hard-linked onto another file.
//!
//! # Architecture
//!
//! * [`database`]: SQLite persistence, schema management and busy retries.
//! * [`record`]: The record model and staleness check.
//!
//! # Staleness
//!
//! A record's digest is trusted only while its stored mtime equals the
//! file's current mtime. A mismatch forces a rehash. Merged records are
//! never re-checked.

pub mod database;
pub mod record;

pub use database::{IndexError, IndexResult, IndexStore, RetryPolicy, SCHEMA_VERSION};
pub use record::{HashGroup, Mtime, Record, StoreStats};
