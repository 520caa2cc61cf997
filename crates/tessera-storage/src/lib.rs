//! Tessera Storage crate - SQLite persistence for the dedup ledger and
//! vector records.
//!
//! Provides a WAL-mode SQLite database with migrations and repository
//! implementations for fingerprints and vector records.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{FingerprintRepository, RecordRepository, StoredRecord};
