//! Repositories over the SQLite tables.
//!
//! `FingerprintRepository` persists the dedup ledger and
//! `RecordRepository` persists vector records so the in-memory index can be
//! rebuilt after a restart.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{OptionalExtension, Transaction};

use tessera_core::error::TesseraError;
use tessera_core::types::{Fingerprint, FingerprintRecord, Metadata, VectorRecord};

use crate::db::Database;

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> TesseraError + '_ {
    move |e| TesseraError::Storage(format!("{}: {}", context, e))
}

// =============================================================================
// Fingerprint ledger
// =============================================================================

/// Repository for the content-hash ledger.
#[derive(Debug, Clone)]
pub struct FingerprintRepository {
    db: Arc<Database>,
}

impl FingerprintRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Whether the hash has been recorded.
    pub fn exists(&self, hash: &Fingerprint) -> Result<bool, TesseraError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM fingerprints WHERE hash = ?1",
                    [hash.to_hex()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to query fingerprint"))?;
            Ok(found.is_some())
        })
    }

    /// Record a hash. Recording an existing hash keeps the original timestamp.
    pub fn record(&self, hash: &Fingerprint, seen_at: DateTime<Utc>) -> Result<(), TesseraError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO fingerprints (hash, seen_at) VALUES (?1, ?2)",
                rusqlite::params![hash.to_hex(), seen_at.timestamp_millis()],
            )
            .map_err(storage_err("Failed to record fingerprint"))?;
            Ok(())
        })
    }

    pub fn get(&self, hash: &Fingerprint) -> Result<Option<FingerprintRecord>, TesseraError> {
        self.db.with_conn(|conn| {
            let millis: Option<i64> = conn
                .query_row(
                    "SELECT seen_at FROM fingerprints WHERE hash = ?1",
                    [hash.to_hex()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("Failed to load fingerprint"))?;

            Ok(millis.map(|ms| FingerprintRecord {
                hash: *hash,
                seen_at: Utc
                    .timestamp_millis_opt(ms)
                    .single()
                    .unwrap_or_else(Utc::now),
            }))
        })
    }

    pub fn count(&self) -> Result<u64, TesseraError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))
                .map_err(storage_err("Failed to count fingerprints"))?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// Vector records
// =============================================================================

/// A persisted record plus its insertion sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub seq: u64,
    pub record: VectorRecord,
}

/// Repository for the vector index backing table.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    db: Arc<Database>,
}

impl RecordRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a batch of records in one transaction.
    ///
    /// Either every row is written or none is.
    pub fn upsert_batch(&self, records: &[StoredRecord]) -> Result<(), TesseraError> {
        self.db.with_transaction(|tx| upsert_rows(tx, records))
    }

    /// Delete a batch of ids in one transaction. Unknown ids are ignored.
    pub fn delete_batch(&self, ids: &[String]) -> Result<usize, TesseraError> {
        self.db.with_transaction(|tx| delete_rows(tx, ids))
    }

    /// Delete `remove` and upsert `records` in a single transaction.
    pub fn replace_batch(
        &self,
        remove: &[String],
        records: &[StoredRecord],
    ) -> Result<usize, TesseraError> {
        self.db.with_transaction(|tx| {
            let removed = delete_rows(tx, remove)?;
            upsert_rows(tx, records)?;
            Ok(removed)
        })
    }

    /// Load every record in insertion order.
    pub fn load_all(&self) -> Result<Vec<StoredRecord>, TesseraError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, seq, text, vector, dimensions, metadata
                     FROM vector_records ORDER BY seq ASC",
                )
                .map_err(storage_err("Failed to prepare record load"))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(storage_err("Failed to load records"))?;

            let mut out = Vec::new();
            for row in rows {
                let (id, seq, text, blob, dimensions, metadata) =
                    row.map_err(storage_err("Failed to read record row"))?;
                let vector = decode_vector(&blob)?;
                if vector.len() != dimensions as usize {
                    return Err(TesseraError::Storage(format!(
                        "Record {} has {} floats but claims {} dimensions",
                        id,
                        vector.len(),
                        dimensions
                    )));
                }
                let metadata: Metadata = serde_json::from_str(&metadata)?;
                out.push(StoredRecord {
                    seq: seq as u64,
                    record: VectorRecord {
                        id,
                        vector,
                        text,
                        metadata,
                    },
                });
            }
            Ok(out)
        })
    }

    pub fn count(&self) -> Result<u64, TesseraError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM vector_records", [], |row| row.get(0))
                .map_err(storage_err("Failed to count records"))?;
            Ok(count as u64)
        })
    }
}

fn upsert_rows(tx: &Transaction<'_>, records: &[StoredRecord]) -> Result<(), TesseraError> {
    let mut stmt = tx
        .prepare(
            "INSERT OR REPLACE INTO vector_records (id, seq, text, vector, dimensions, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(storage_err("Failed to prepare record upsert"))?;

    for stored in records {
        let record = &stored.record;
        let metadata = serde_json::to_string(&record.metadata)?;
        stmt.execute(rusqlite::params![
            record.id,
            stored.seq as i64,
            record.text,
            encode_vector(&record.vector),
            record.vector.len() as i64,
            metadata,
        ])
        .map_err(storage_err("Failed to upsert record"))?;
    }
    Ok(())
}

fn delete_rows(tx: &Transaction<'_>, ids: &[String]) -> Result<usize, TesseraError> {
    let mut stmt = tx
        .prepare("DELETE FROM vector_records WHERE id = ?1")
        .map_err(storage_err("Failed to prepare record delete"))?;
    let mut removed = 0;
    for id in ids {
        removed += stmt
            .execute([id])
            .map_err(storage_err("Failed to delete record"))?;
    }
    Ok(removed)
}

/// Little-endian f32 packing.
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, TesseraError> {
    if blob.len() % 4 != 0 {
        return Err(TesseraError::Storage(format!(
            "Vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
