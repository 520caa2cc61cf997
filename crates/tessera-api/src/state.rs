//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use tessera_core::config::TesseraConfig;
use tessera_vector::{FingerprintStore, IngestionPipeline, RagChain, Retriever, VectorIndex};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. The index
/// and ledger are the same instances the pipeline and retriever use.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (read-only once serving).
    pub config: Arc<TesseraConfig>,
    /// Ingestion pipeline (fingerprint, chunk, embed, index).
    pub pipeline: Arc<IngestionPipeline>,
    /// Retrieval plus generation.
    pub chain: Arc<RagChain>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
    /// Bearer token for protected routes. `None` leaves them open.
    pub api_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(config: TesseraConfig, pipeline: IngestionPipeline, chain: RagChain) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            chain: Arc::new(chain),
            start_time: Instant::now(),
            api_token: None,
        }
    }

    /// Require this bearer token on every route except /health.
    pub fn with_api_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        self.pipeline.index()
    }

    pub fn ledger(&self) -> &Arc<dyn FingerprintStore> {
        self.pipeline.ledger()
    }

    pub fn retriever(&self) -> &Retriever {
        self.chain.retriever()
    }
}
