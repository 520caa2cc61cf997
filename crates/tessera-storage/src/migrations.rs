//! Database schema migrations.
//!
//! Creates the fingerprint ledger and the vector record backing table.

use rusqlite::Connection;
use tracing::info;

use tessera_core::error::TesseraError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), TesseraError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| TesseraError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| TesseraError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: ledger and record tables.
fn apply_v1(conn: &Connection) -> Result<(), TesseraError> {
    conn.execute_batch(
        "
        -- Content-hash ledger. One row per unique document ever ingested.
        CREATE TABLE IF NOT EXISTS fingerprints (
            hash        TEXT PRIMARY KEY NOT NULL
                        CHECK (length(hash) = 64),
            seen_at     INTEGER NOT NULL
        );

        -- Backing store for the in-memory vector index.
        CREATE TABLE IF NOT EXISTS vector_records (
            id          TEXT PRIMARY KEY NOT NULL,
            seq         INTEGER NOT NULL,
            text        TEXT NOT NULL,
            vector      BLOB NOT NULL,
            dimensions  INTEGER NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_vector_records_seq
            ON vector_records (seq ASC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| TesseraError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
