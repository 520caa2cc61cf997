//! SQLite connection management.
//!
//! One rusqlite Connection behind a Mutex. File databases run in WAL mode so
//! a second process (for example the CLI while the server is up) can read
//! concurrently.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

use tessera_core::error::TesseraError;

use crate::migrations;

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, TesseraError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TesseraError::Storage(format!("Failed to open database: {}", e)))?;
        conn.execute_batch(FILE_PRAGMAS)
            .map_err(|e| TesseraError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests and `--ephemeral` runs).
    pub fn in_memory() -> Result<Self, TesseraError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TesseraError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, TesseraError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run a closure against the connection. The mutex is held throughout.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, TesseraError>
    where
        F: FnOnce(&Connection) -> Result<T, TesseraError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TesseraError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a closure inside a transaction, committing only if it succeeds.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, TesseraError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, TesseraError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| TesseraError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| TesseraError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| TesseraError::Storage(format!("Failed to commit: {}", e)))?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_rows(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(|e| TesseraError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_rows(&db, "fingerprints"), 0);
        assert_eq!(count_rows(&db, "vector_records"), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path).unwrap();

        assert_eq!(count_rows(&db, "fingerprints"), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| TesseraError::Storage(e.to_string()))?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();
    }
}
