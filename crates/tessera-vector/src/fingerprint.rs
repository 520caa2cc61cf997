//! Content-hash ledger used for ingestion deduplication.
//!
//! `exists` never mutates and `record` is idempotent, so the
//! exists-then-record race between two concurrent ingestions of the same
//! document is harmless: both embed, both replace the same record ids, and
//! the second `record` is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::debug;

use tessera_core::error::TesseraError;
use tessera_core::types::{Fingerprint, FingerprintRecord};
use tessera_storage::{Database, FingerprintRepository};

/// Persistent set of content hashes that have been fully ingested.
pub trait FingerprintStore: Send + Sync {
    /// Whether the hash has been recorded.
    fn exists(&self, hash: &Fingerprint) -> Result<bool, TesseraError>;

    /// Record the hash. Recording a known hash is a no-op.
    fn record(&self, hash: &Fingerprint) -> Result<(), TesseraError>;

    /// Number of recorded hashes.
    fn len(&self) -> Result<usize, TesseraError>;

    fn is_empty(&self) -> Result<bool, TesseraError> {
        Ok(self.len()? == 0)
    }
}

// ---------------------------------------------------------------------------
// MemoryFingerprintStore
// ---------------------------------------------------------------------------

/// Process-local ledger. Contents are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryFingerprintStore {
    records: Arc<RwLock<HashMap<Fingerprint, FingerprintRecord>>>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &Fingerprint) -> Result<Option<FingerprintRecord>, TesseraError> {
        let records = self
            .records
            .read()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(records.get(hash).cloned())
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn exists(&self, hash: &Fingerprint) -> Result<bool, TesseraError> {
        let records = self
            .records
            .read()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(records.contains_key(hash))
    }

    fn record(&self, hash: &Fingerprint) -> Result<(), TesseraError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;
        records.entry(*hash).or_insert_with(|| FingerprintRecord {
            hash: *hash,
            seen_at: Utc::now(),
        });
        debug!(hash = %hash, "Recorded fingerprint");
        Ok(())
    }

    fn len(&self) -> Result<usize, TesseraError> {
        let records = self
            .records
            .read()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(records.len())
    }
}

// ---------------------------------------------------------------------------
// SqliteFingerprintStore
// ---------------------------------------------------------------------------

/// Ledger backed by the `fingerprints` table; survives restarts.
#[derive(Debug, Clone)]
pub struct SqliteFingerprintStore {
    repo: FingerprintRepository,
}

impl SqliteFingerprintStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: FingerprintRepository::new(db),
        }
    }
}

impl FingerprintStore for SqliteFingerprintStore {
    fn exists(&self, hash: &Fingerprint) -> Result<bool, TesseraError> {
        self.repo.exists(hash)
    }

    fn record(&self, hash: &Fingerprint) -> Result<(), TesseraError> {
        self.repo.record(hash, Utc::now())?;
        debug!(hash = %hash, "Recorded fingerprint");
        Ok(())
    }

    fn len(&self) -> Result<usize, TesseraError> {
        Ok(self.repo.count()? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &dyn FingerprintStore) {
        let a = Fingerprint::of_text("document a");
        let b = Fingerprint::of_text("document b");

        assert!(store.is_empty().unwrap());
        assert!(!store.exists(&a).unwrap());

        store.record(&a).unwrap();
        assert!(store.exists(&a).unwrap());
        assert!(!store.exists(&b).unwrap());

        store.record(&a).unwrap();
        assert_eq!(store.len().unwrap(), 1);

        store.record(&b).unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_memory_store_semantics() {
        exercise_store(&MemoryFingerprintStore::new());
    }

    #[test]
    fn test_sqlite_store_semantics() {
        let db = Arc::new(Database::in_memory().unwrap());
        exercise_store(&SqliteFingerprintStore::new(db));
    }

    #[test]
    fn test_exists_does_not_mutate() {
        let store = MemoryFingerprintStore::new();
        let fp = Fingerprint::of_text("lookup only");
        for _ in 0..3 {
            assert!(!store.exists(&fp).unwrap());
        }
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_record_keeps_first_timestamp() {
        let store = MemoryFingerprintStore::new();
        let fp = Fingerprint::of_text("stamp");
        store.record(&fp).unwrap();
        let first = store.get(&fp).unwrap().unwrap().seen_at;
        store.record(&fp).unwrap();
        assert_eq!(store.get(&fp).unwrap().unwrap().seen_at, first);
    }

    #[test]
    fn test_line_ending_variants_share_a_fingerprint() {
        let store = MemoryFingerprintStore::new();
        store.record(&Fingerprint::of_text("one\r\ntwo")).unwrap();
        assert!(store.exists(&Fingerprint::of_text("one\ntwo")).unwrap());
        assert!(store.exists(&Fingerprint::of_text("one\rtwo")).unwrap());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.db");
        let fp = Fingerprint::of_text("durable");

        {
            let store = SqliteFingerprintStore::new(Arc::new(Database::new(&path).unwrap()));
            store.record(&fp).unwrap();
        }

        let store = SqliteFingerprintStore::new(Arc::new(Database::new(&path).unwrap()));
        assert!(store.exists(&fp).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }
}
