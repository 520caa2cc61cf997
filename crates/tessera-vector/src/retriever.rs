//! Query embedding plus vector search in one call, and context formatting.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tessera_core::error::TesseraError;
use tessera_core::types::{MetadataFilter, RetrievalResult};

use crate::embedding::{check_batch_shape, DynEmbeddingGateway};
use crate::index::VectorIndex;

/// Returned by [`format`] when there is nothing to put in the prompt.
pub const NO_CONTEXT_MARKER: &str = "No relevant context found.";

const CONTEXT_BEGIN: &str = "[Context begin]";
const CONTEXT_END: &str = "[Context end]";

/// Embeds a query and searches the shared index.
///
/// Failures are always surfaced: an empty result means nothing matched, never
/// that the gateway or index failed.
#[derive(Clone)]
pub struct Retriever {
    gateway: Arc<dyn DynEmbeddingGateway>,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(gateway: Arc<dyn DynEmbeddingGateway>, index: Arc<VectorIndex>) -> Self {
        Self { gateway, index }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Return the `k` records closest to `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, TesseraError> {
        if query.trim().is_empty() {
            return Err(TesseraError::InvalidInput("query is empty".to_string()));
        }

        let inputs = vec![query.to_string()];
        let vectors = self.gateway.embed_boxed(&inputs).await?;
        check_batch_shape(1, self.gateway.dimensions(), &vectors)?;

        let results = self.index.search(&vectors[0], k, filter)?;
        debug!(k, hits = results.len(), "Retrieved context");
        Ok(results)
    }

    /// [`Retriever::retrieve`] bounded by a deadline.
    pub async fn retrieve_within(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        timeout: Duration,
    ) -> Result<Vec<RetrievalResult>, TesseraError> {
        match tokio::time::timeout(timeout, self.retrieve(query, k, filter)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "Retrieval deadline exceeded");
                Err(TesseraError::Timeout(timeout))
            }
        }
    }
}

/// Render retrieved records as one bracketed context block, best match
/// first, separated by blank lines.
pub fn format(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }

    let body = results
        .iter()
        .map(|r| r.record.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n{}\n{}", CONTEXT_BEGIN, body, CONTEXT_END)
}
