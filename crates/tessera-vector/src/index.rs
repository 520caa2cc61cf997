//! In-memory vector index with brute-force cosine similarity search.
//!
//! All operations are O(n) for search, which is acceptable for moderate
//! dataset sizes. Records are keyed by id; every insert (including a
//! replacement) takes a fresh sequence number, and equal scores are ordered
//! by that sequence so results are deterministic.
//!
//! When a [`RecordStore`] is attached, `add` and `delete` write through to it
//! while holding the write lock and before touching memory, so a failed
//! write leaves both sides unchanged.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use tessera_core::error::TesseraError;
use tessera_core::types::{MetadataFilter, MetadataValue, RetrievalResult, VectorRecord};
use tessera_storage::{RecordRepository, StoredRecord};

/// Durable backing for a [`VectorIndex`].
pub trait RecordStore: Send + Sync {
    /// Insert or replace records atomically.
    fn upsert(&self, records: &[StoredRecord]) -> Result<(), TesseraError>;

    /// Remove records atomically. Unknown ids are ignored.
    fn remove(&self, ids: &[String]) -> Result<(), TesseraError>;

    /// Remove `ids` and insert `records` as one atomic change.
    fn replace(&self, ids: &[String], records: &[StoredRecord]) -> Result<(), TesseraError>;

    /// Every stored record, in insertion order.
    fn load(&self) -> Result<Vec<StoredRecord>, TesseraError>;
}

impl RecordStore for RecordRepository {
    fn upsert(&self, records: &[StoredRecord]) -> Result<(), TesseraError> {
        self.upsert_batch(records)
    }

    fn remove(&self, ids: &[String]) -> Result<(), TesseraError> {
        self.delete_batch(ids).map(|_| ())
    }

    fn replace(&self, ids: &[String], records: &[StoredRecord]) -> Result<(), TesseraError> {
        self.replace_batch(ids, records).map(|_| ())
    }

    fn load(&self) -> Result<Vec<StoredRecord>, TesseraError> {
        self.load_all()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    record: VectorRecord,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// In-memory vector index using brute-force cosine similarity.
///
/// Thread-safe via one interior RwLock: searches run in parallel, writes
/// hold the lock for their whole batch. Callers always receive clones.
#[derive(Clone)]
pub struct VectorIndex {
    dimensions: usize,
    inner: Arc<RwLock<Inner>>,
    store: Option<Arc<dyn RecordStore>>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimensions", &self.dimensions)
            .field("len", &self.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl VectorIndex {
    /// Create an empty, memory-only index.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: Arc::new(RwLock::new(Inner::default())),
            store: None,
        }
    }

    /// Rebuild an index from a backing store and keep writing through to it.
    ///
    /// Fails if any stored vector does not have `dimensions` components.
    pub fn restore(dimensions: usize, store: Arc<dyn RecordStore>) -> Result<Self, TesseraError> {
        let stored = store.load()?;
        let mut inner = Inner::default();

        for StoredRecord { seq, record } in stored {
            if record.vector.len() != dimensions {
                return Err(TesseraError::DimensionMismatch {
                    expected: dimensions,
                    actual: record.vector.len(),
                });
            }
            inner.next_seq = inner.next_seq.max(seq + 1);
            inner.entries.insert(record.id.clone(), Entry { seq, record });
        }

        info!(records = inner.entries.len(), dimensions, "Restored vector index");

        Ok(Self {
            dimensions,
            inner: Arc::new(RwLock::new(inner)),
            store: Some(store),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Insert records, replacing any existing record with the same id.
    ///
    /// Every vector is validated before anything is written, so one bad
    /// vector rejects the whole batch. Within a batch the last record for
    /// an id wins.
    pub fn add(&self, records: Vec<VectorRecord>) -> Result<(), TesseraError> {
        self.check_batch(&records)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;

        let batch = sequence_batch(&inner, &records);
        if let Some(store) = &self.store {
            store.upsert(&batch)?;
        }

        inner.next_seq += records.len() as u64;
        let count = batch.len();
        for StoredRecord { seq, record } in batch {
            inner.entries.insert(record.id.clone(), Entry { seq, record });
        }

        debug!(count, total = inner.entries.len(), "Added records to index");
        Ok(())
    }

    /// Make `records` the complete set of records for `source_id`.
    ///
    /// Records of that source whose ids are not in `records` are removed,
    /// and `records` are inserted, under one write lock and one store
    /// transaction. Readers see either the old version or the new one.
    pub fn replace_source(
        &self,
        source_id: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), TesseraError> {
        self.check_batch(&records)?;

        let mut inner = self
            .inner
            .write()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;

        let batch = sequence_batch(&inner, &records);
        let wanted = MetadataValue::String(source_id.to_string());
        let stale: Vec<String> = inner
            .entries
            .values()
            .filter(|entry| entry.record.metadata.get("source_id") == Some(&wanted))
            .filter(|entry| !batch.iter().any(|s| s.record.id == entry.record.id))
            .map(|entry| entry.record.id.clone())
            .collect();

        if stale.is_empty() && batch.is_empty() {
            return Ok(());
        }

        if let Some(store) = &self.store {
            store.replace(&stale, &batch)?;
        }

        for id in &stale {
            inner.entries.remove(id);
        }
        inner.next_seq += records.len() as u64;
        let count = batch.len();
        for StoredRecord { seq, record } in batch {
            inner.entries.insert(record.id.clone(), Entry { seq, record });
        }

        debug!(
            source_id,
            count,
            stale = stale.len(),
            total = inner.entries.len(),
            "Replaced source records"
        );
        Ok(())
    }

    /// Remove records by id. Unknown ids are a no-op.
    pub fn delete(&self, ids: &[String]) -> Result<(), TesseraError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;

        if let Some(store) = &self.store {
            store.remove(ids)?;
        }

        let before = inner.entries.len();
        for id in ids {
            inner.entries.remove(id);
        }

        debug!(removed = before - inner.entries.len(), "Deleted records from index");
        Ok(())
    }

    /// Return the `k` records most similar to `query`, best first.
    ///
    /// Only records matching `filter` are considered. Equal scores keep
    /// insertion order. Fewer than `k` matches is not an error.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, TesseraError> {
        self.check_vector(query)?;

        let inner = self
            .inner
            .read()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, &Entry)> = inner
            .entries
            .values()
            .filter(|entry| filter.map_or(true, |f| f.matches(&entry.record.metadata)))
            .map(|entry| (cosine_similarity(query, &entry.record.vector), entry))
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| RetrievalResult {
                record: entry.record.clone(),
                score,
            })
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<VectorRecord>, TesseraError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(inner.entries.get(id).map(|entry| entry.record.clone()))
    }

    /// Ids of every record whose `source_id` metadata equals `source_id`,
    /// in insertion order.
    pub fn ids_for_source(&self, source_id: &str) -> Result<Vec<String>, TesseraError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| TesseraError::Storage(format!("Lock poisoned: {}", e)))?;

        let wanted = MetadataValue::String(source_id.to_string());
        let mut matches: Vec<&Entry> = inner
            .entries
            .values()
            .filter(|entry| entry.record.metadata.get("source_id") == Some(&wanted))
            .collect();
        matches.sort_by_key(|entry| entry.seq);
        Ok(matches.into_iter().map(|e| e.record.id.clone()).collect())
    }

    /// Return the number of records currently stored in the index.
    ///
    /// Writers never leave the map half-updated, so a poisoned lock still
    /// holds a consistent count.
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    fn check_batch(&self, records: &[VectorRecord]) -> Result<(), TesseraError> {
        for record in records {
            self.check_vector(&record.vector)?;
            if record.id.is_empty() {
                return Err(TesseraError::InvalidInput("record id is empty".to_string()));
            }
        }
        Ok(())
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), TesseraError> {
        if vector.len() != self.dimensions {
            return Err(TesseraError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(TesseraError::InvalidInput(
                "vector contains NaN or infinite components".to_string(),
            ));
        }
        Ok(())
    }
}

/// Assign sequence numbers to a batch, keeping the last record per id.
fn sequence_batch(inner: &Inner, records: &[VectorRecord]) -> Vec<StoredRecord> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut batch: Vec<StoredRecord> = Vec::with_capacity(records.len());
    for (offset, record) in records.iter().enumerate() {
        let stored = StoredRecord {
            seq: inner.next_seq + offset as u64,
            record: record.clone(),
        };
        match position.get(record.id.as_str()) {
            Some(&at) => batch[at] = stored,
            None => {
                position.insert(record.id.as_str(), batch.len());
                batch.push(stored);
            }
        }
    }
    batch
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::Metadata;
    use tessera_storage::Database;

    const EPSILON: f64 = 1e-6;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            text: format!("text {}", id),
            metadata: Metadata::new(),
        }
    }

    fn record_from(id: &str, source: &str, vector: Vec<f32>) -> VectorRecord {
        let mut r = record(id, vector);
        r.metadata.insert("source_id".into(), source.into());
        r
    }

    fn ids(results: &[RetrievalResult]) -> Vec<&str> {
        results.iter().map(|r| r.record.id.as_str()).collect()
    }

    // =========================================================================
    // Cosine similarity
    // =========================================================================

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![0.3f32, -1.2, 4.0, 0.01];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < EPSILON);
    }

    #[test]
    fn test_cosine_similarity_parallel() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0f32; 100];
        let b = vec![1.0f32; 100];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let a = vec![1.0f32; 10];
        let b = vec![1.0f32; 20];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    // =========================================================================
    // Add / replace / delete
    // =========================================================================

    #[test]
    fn test_add_and_get() {
        let index = VectorIndex::new(2);
        index.add(vec![record("a", vec![1.0, 0.0])]).unwrap();

        assert_eq!(index.len(), 1);
        let got = index.get("a").unwrap().unwrap();
        assert_eq!(got.vector, vec![1.0, 0.0]);
        assert!(index.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_add_rejects_whole_batch_on_dimension_mismatch() {
        let index = VectorIndex::new(2);
        let err = index
            .add(vec![record("ok", vec![1.0, 0.0]), record("bad", vec![1.0, 0.0, 0.0])])
            .unwrap_err();

        assert!(matches!(
            err,
            TesseraError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_add_rejects_non_finite() {
        let index = VectorIndex::new(2);
        assert!(index.add(vec![record("nan", vec![f32::NAN, 0.0])]).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_add_replaces_by_id() {
        let index = VectorIndex::new(2);
        index.add(vec![record("a", vec![1.0, 0.0])]).unwrap();
        index.add(vec![record("a", vec![0.0, 1.0])]).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap().unwrap().vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_duplicate_ids_in_batch_last_wins() {
        let index = VectorIndex::new(2);
        index
            .add(vec![record("a", vec![1.0, 0.0]), record("a", vec![0.0, 1.0])])
            .unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap().unwrap().vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_delete_then_search_never_returns_id() {
        let index = VectorIndex::new(2);
        index
            .add(vec![record("a", vec![1.0, 0.0]), record("b", vec![0.9, 0.1])])
            .unwrap();
        index.delete(&["a".to_string()]).unwrap();

        let hits = index.search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(ids(&hits), vec!["b"]);
    }

    #[test]
    fn test_delete_nonexistent() {
        let index = VectorIndex::new(2);
        index.delete(&["ghost".to_string()]).unwrap();
        assert!(index.is_empty());
    }

    // =========================================================================
    // Search
    // =========================================================================

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[1.0, 0.0, 0.0], 10, None).unwrap().is_empty());
    }

    #[test]
    fn test_search_returns_all_sorted_when_k_exceeds_len() {
        let index = VectorIndex::new(2);
        index
            .add(vec![
                record("far", vec![-1.0, 0.0]),
                record("near", vec![1.0, 0.1]),
                record("mid", vec![0.0, 1.0]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(ids(&hits), vec!["near", "mid", "far"]);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_search_respects_k_limit() {
        let index = VectorIndex::new(2);
        let records = (0..10)
            .map(|i| record(&format!("r{}", i), vec![1.0, i as f32]))
            .collect();
        index.add(records).unwrap();

        assert_eq!(index.search(&[1.0, 0.0], 3, None).unwrap().len(), 3);
        assert!(index.search(&[1.0, 0.0], 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_search_ties_keep_insertion_order() {
        let index = VectorIndex::new(2);
        index.add(vec![record("first", vec![1.0, 0.0])]).unwrap();
        index.add(vec![record("second", vec![2.0, 0.0])]).unwrap();
        index.add(vec![record("third", vec![3.0, 0.0])]).unwrap();

        let hits = index.search(&[1.0, 0.0], 3, None).unwrap();
        assert_eq!(ids(&hits), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_replacement_counts_as_new_insertion() {
        let index = VectorIndex::new(2);
        index
            .add(vec![record("a", vec![1.0, 0.0]), record("b", vec![1.0, 0.0])])
            .unwrap();
        index.add(vec![record("a", vec![1.0, 0.0])]).unwrap();

        let hits = index.search(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(ids(&hits), vec!["b", "a"]);
    }

    #[test]
    fn test_search_query_dimension_mismatch() {
        let index = VectorIndex::new(2);
        index.add(vec![record("a", vec![1.0, 0.0])]).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1, None),
            Err(TesseraError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_search_with_metadata_filter() {
        let index = VectorIndex::new(2);
        index
            .add(vec![
                record_from("x#0", "x", vec![1.0, 0.0]),
                record_from("y#0", "y", vec![1.0, 0.0]),
                record_from("y#1", "y", vec![0.0, 1.0]),
            ])
            .unwrap();

        let filter = MetadataFilter::new().with("source_id", "y");
        let hits = index.search(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(ids(&hits), vec!["y#0", "y#1"]);

        let empty = MetadataFilter::new();
        assert_eq!(index.search(&[1.0, 0.0], 10, Some(&empty)).unwrap().len(), 3);

        let none = MetadataFilter::new().with("source_id", "z");
        assert!(index.search(&[1.0, 0.0], 10, Some(&none)).unwrap().is_empty());
    }

    #[test]
    fn test_ids_for_source() {
        let index = VectorIndex::new(1);
        index
            .add(vec![
                record_from("doc#1", "doc", vec![1.0]),
                record_from("other#0", "other", vec![1.0]),
                record_from("doc#0", "doc", vec![1.0]),
            ])
            .unwrap();

        assert_eq!(index.ids_for_source("doc").unwrap(), vec!["doc#1", "doc#0"]);
        assert!(index.ids_for_source("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let index = VectorIndex::new(2);
        index.add(vec![record("seed", vec![1.0, 0.0])]).unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let index = &index;
                s.spawn(move || {
                    for i in 0..50 {
                        if t == 0 {
                            index
                                .add(vec![record(&format!("w{}", i), vec![1.0, i as f32])])
                                .unwrap();
                        } else {
                            let hits = index.search(&[1.0, 0.0], 5, None).unwrap();
                            assert!(!hits.is_empty());
                        }
                    }
                });
            }
        });

        assert_eq!(index.len(), 51);
    }

    #[test]
    fn test_batches_are_never_observed_torn() {
        const BATCH: usize = 8;
        const BATCHES: usize = 40;

        let index = VectorIndex::new(2);
        let tagged = |b: usize| MetadataFilter::new().with("batch", b);

        std::thread::scope(|s| {
            let writer = &index;
            s.spawn(move || {
                for b in 0..BATCHES {
                    let records = (0..BATCH)
                        .map(|i| {
                            let mut r = record(&format!("b{}-{}", b, i), vec![1.0, i as f32]);
                            r.metadata.insert("batch".into(), b.into());
                            r
                        })
                        .collect();
                    writer.add(records).unwrap();
                }
            });

            for _ in 0..3 {
                let reader = &index;
                s.spawn(move || {
                    for round in 0..200 {
                        let filter = tagged(round % BATCHES);
                        let hits = reader.search(&[1.0, 0.0], usize::MAX, Some(&filter)).unwrap();
                        assert!(
                            hits.is_empty() || hits.len() == BATCH,
                            "saw {} records of a {}-record batch",
                            hits.len(),
                            BATCH
                        );
                    }
                });
            }
        });

        assert_eq!(index.len(), BATCH * BATCHES);
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let index = VectorIndex::new(1);
        index.add(vec![record("a", vec![1.0])]).unwrap();

        let poisoner = index.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(index.inner.is_poisoned());
        assert_eq!(index.len(), 1);
        assert!(matches!(index.get("a"), Err(TesseraError::Storage(_))));
    }

    // =========================================================================
    // Replace by source
    // =========================================================================

    #[test]
    fn test_replace_source_drops_stale_ordinals() {
        let index = VectorIndex::new(1);
        index
            .add(vec![
                record_from("doc#0", "doc", vec![1.0]),
                record_from("doc#1", "doc", vec![1.0]),
                record_from("doc#2", "doc", vec![1.0]),
                record_from("other#0", "other", vec![1.0]),
            ])
            .unwrap();

        let mut fresh = record_from("doc#0", "doc", vec![2.0]);
        fresh.text = "new version".to_string();
        index.replace_source("doc", vec![fresh]).unwrap();

        assert_eq!(index.ids_for_source("doc").unwrap(), vec!["doc#0"]);
        assert_eq!(index.get("doc#0").unwrap().unwrap().text, "new version");
        assert!(index.get("other#0").unwrap().is_some());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_replace_source_validates_before_removing() {
        let index = VectorIndex::new(1);
        index
            .add(vec![record_from("doc#0", "doc", vec![1.0]), record_from("doc#1", "doc", vec![1.0])])
            .unwrap();

        let err = index
            .replace_source("doc", vec![record_from("doc#0", "doc", vec![1.0, 2.0])])
            .unwrap_err();
        assert!(matches!(err, TesseraError::DimensionMismatch { .. }));
        assert_eq!(index.ids_for_source("doc").unwrap(), vec!["doc#0", "doc#1"]);
    }

    #[test]
    fn test_replace_source_store_failure_leaves_memory_untouched() {
        let index = VectorIndex::restore(1, Arc::new(FailingStore)).unwrap();
        let err = index
            .replace_source("doc", vec![record_from("doc#0", "doc", vec![1.0])])
            .unwrap_err();
        assert!(matches!(err, TesseraError::Storage(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_replace_source_persists_removals() {
        let db = Arc::new(Database::in_memory().unwrap());
        {
            let index = VectorIndex::restore(1, sqlite_store(&db)).unwrap();
            index
                .add(vec![record_from("doc#0", "doc", vec![1.0]), record_from("doc#1", "doc", vec![1.0])])
                .unwrap();
            index
                .replace_source("doc", vec![record_from("doc#0", "doc", vec![3.0])])
                .unwrap();
        }

        let restored = VectorIndex::restore(1, sqlite_store(&db)).unwrap();
        assert_eq!(restored.ids_for_source("doc").unwrap(), vec!["doc#0"]);
        assert_eq!(restored.get("doc#0").unwrap().unwrap().vector, vec![3.0]);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn sqlite_store(db: &Arc<Database>) -> Arc<dyn RecordStore> {
        Arc::new(RecordRepository::new(Arc::clone(db)))
    }

    #[test]
    fn test_restore_rebuilds_order_and_contents() {
        let db = Arc::new(Database::in_memory().unwrap());

        {
            let index = VectorIndex::restore(2, sqlite_store(&db)).unwrap();
            index.add(vec![record("a", vec![1.0, 0.0])]).unwrap();
            index.add(vec![record("b", vec![1.0, 0.0])]).unwrap();
            index.add(vec![record("c", vec![0.0, 1.0])]).unwrap();
            index.delete(&["c".to_string()]).unwrap();
        }

        let restored = VectorIndex::restore(2, sqlite_store(&db)).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.is_persistent());
        let hits = restored.search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(ids(&hits), vec!["a", "b"]);

        // New inserts sort after restored ones.
        restored.add(vec![record("d", vec![1.0, 0.0])]).unwrap();
        let hits = restored.search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(ids(&hits), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_restore_rejects_wrong_dimensions() {
        let db = Arc::new(Database::in_memory().unwrap());
        VectorIndex::restore(2, sqlite_store(&db))
            .unwrap()
            .add(vec![record("a", vec![1.0, 0.0])])
            .unwrap();

        assert!(matches!(
            VectorIndex::restore(3, sqlite_store(&db)),
            Err(TesseraError::DimensionMismatch { .. })
        ));
    }

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn upsert(&self, _records: &[StoredRecord]) -> Result<(), TesseraError> {
            Err(TesseraError::Storage("disk full".into()))
        }

        fn remove(&self, _ids: &[String]) -> Result<(), TesseraError> {
            Err(TesseraError::Storage("disk full".into()))
        }

        fn replace(&self, _ids: &[String], _records: &[StoredRecord]) -> Result<(), TesseraError> {
            Err(TesseraError::Storage("disk full".into()))
        }

        fn load(&self) -> Result<Vec<StoredRecord>, TesseraError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_store_failure_leaves_memory_untouched() {
        let index = VectorIndex::restore(2, Arc::new(FailingStore)).unwrap();
        let err = index.add(vec![record("a", vec![1.0, 0.0])]).unwrap_err();

        assert!(matches!(err, TesseraError::Storage(_)));
        assert!(index.is_empty());
    }
}
