//! Tessera ingestion pipeline.
//!
//! The IngestionPipeline takes a document through fingerprinting, the
//! dedup ledger, chunking, batched embedding and index insertion.
//!
//! The index is written before the ledger. If the process dies between the
//! two, the document is not marked as seen and the next ingestion re-embeds
//! it; because records are keyed `source_id#ordinal`, that retry replaces the
//! earlier records instead of duplicating them.
//!
//! Ingesting new text under an existing `source_id` replaces that source's
//! records wholesale, so chunks of the previous version never linger.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tessera_core::error::TesseraError;
use tessera_core::types::{Fingerprint, IngestRequest, IngestSummary, MetadataValue, VectorRecord};

use crate::chunker::Chunker;
use crate::embedding::{check_batch_shape, DynEmbeddingGateway};
use crate::fingerprint::FingerprintStore;
use crate::index::VectorIndex;

/// Metadata keys the pipeline writes on every record. They override caller
/// metadata with the same name.
pub const META_SOURCE_ID: &str = "source_id";
pub const META_ORDINAL: &str = "ordinal";
pub const META_START_OFFSET: &str = "start_offset";
pub const META_END_OFFSET: &str = "end_offset";

/// The main Tessera ingestion pipeline.
///
/// Processes a document through:
/// 1. Fingerprinting and the dedup ledger
/// 2. Chunking
/// 3. Embedding, in batches no larger than the gateway allows
/// 4. Vector index insertion, replacing the source's previous records
/// 5. Recording the fingerprint
///
/// Any failing step aborts the document and its error is returned as is.
#[derive(Clone)]
pub struct IngestionPipeline {
    chunker: Chunker,
    gateway: Arc<dyn DynEmbeddingGateway>,
    index: Arc<VectorIndex>,
    ledger: Arc<dyn FingerprintStore>,
    default_timeout: Option<Duration>,
}

impl IngestionPipeline {
    /// Fails with `Config` if the gateway and index disagree on
    /// dimensionality.
    pub fn new(
        chunker: Chunker,
        gateway: Arc<dyn DynEmbeddingGateway>,
        index: Arc<VectorIndex>,
        ledger: Arc<dyn FingerprintStore>,
    ) -> Result<Self, TesseraError> {
        if gateway.dimensions() != index.dimensions() {
            return Err(TesseraError::Config(format!(
                "embedding gateway produces {} dimensions but the index holds {}",
                gateway.dimensions(),
                index.dimensions()
            )));
        }

        Ok(Self {
            chunker,
            gateway,
            index,
            ledger,
            default_timeout: None,
        })
    }

    /// Deadline applied by [`IngestionPipeline::ingest`].
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Ingest one document, bounded by the default deadline if one is set.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestSummary, TesseraError> {
        match self.default_timeout {
            Some(timeout) => self.ingest_within(request, timeout).await,
            None => self.run(request).await,
        }
    }

    /// Ingest one document under an explicit deadline.
    ///
    /// On expiry the in-flight embedding call is dropped and `Timeout` is
    /// returned. The index and ledger are only written after the last await
    /// point, so an expired call never leaves partial state behind.
    pub async fn ingest_within(
        &self,
        request: IngestRequest,
        timeout: Duration,
    ) -> Result<IngestSummary, TesseraError> {
        let source_id = request.source_id.clone();
        match tokio::time::timeout(timeout, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(source_id = %source_id, ?timeout, "Ingestion deadline exceeded");
                Err(TesseraError::Timeout(timeout))
            }
        }
    }

    async fn run(&self, request: IngestRequest) -> Result<IngestSummary, TesseraError> {
        let IngestRequest {
            source_id,
            text,
            metadata,
        } = request;

        if source_id.trim().is_empty() {
            return Err(TesseraError::InvalidInput("source_id is empty".to_string()));
        }

        if text.trim().is_empty() {
            debug!(source_id = %source_id, "Skipping document with empty text");
            return Ok(IngestSummary::default());
        }

        // Step 1: dedup on content hash.
        let fingerprint = Fingerprint::of_text(&text);
        if self.ledger.exists(&fingerprint)? {
            info!(source_id = %source_id, hash = %fingerprint, "Duplicate document skipped");
            return Ok(IngestSummary::duplicate());
        }

        // Step 2: chunk.
        let chunks = self.chunker.split(&source_id, &text);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        // Step 3: embed, all-or-nothing.
        let vectors = self.embed_all(&texts).await?;

        // Step 4: build records and insert.
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut meta = metadata.clone();
                meta.insert(META_SOURCE_ID.to_string(), MetadataValue::from(source_id.as_str()));
                meta.insert(META_ORDINAL.to_string(), chunk.ordinal.into());
                meta.insert(META_START_OFFSET.to_string(), chunk.start_offset.into());
                meta.insert(META_END_OFFSET.to_string(), chunk.end_offset.into());
                VectorRecord {
                    id: chunk.record_id(),
                    vector,
                    text: chunk.text,
                    metadata: meta,
                }
            })
            .collect();

        let count = records.len();
        self.index.replace_source(&source_id, records)?;

        // Step 5: mark as seen only once the records are in place.
        self.ledger.record(&fingerprint)?;

        info!(
            source_id = %source_id,
            hash = %fingerprint,
            chunks = count,
            "Document ingested"
        );
        Ok(IngestSummary::ingested(count))
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TesseraError> {
        let batch_size = self.gateway.max_batch_size().max(1);
        let dimensions = self.gateway.dimensions();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let embedded = self.gateway.embed_boxed(batch).await?;
            check_batch_shape(batch.len(), dimensions, &embedded)?;
            vectors.extend(embedded);
        }

        debug!(
            chunks = texts.len(),
            batches = texts.len().div_ceil(batch_size),
            "Embedded chunks"
        );
        Ok(vectors)
    }

    /// Get a reference to the underlying vector index.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn ledger(&self) -> &Arc<dyn FingerprintStore> {
        &self.ledger
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }
}
