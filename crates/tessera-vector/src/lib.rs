//! Tessera Vector crate - fingerprint ledger, chunker, embedding gateway,
//! vector index, retriever, generation chain, and ingestion pipeline.
//!
//! Provides content-addressed deduplication, recursive text splitting,
//! batched embedding through a pluggable gateway, brute-force cosine search
//! with metadata filtering, and the pipeline that ties them together.

pub mod chunker;
pub mod embedding;
pub mod fingerprint;
pub mod generation;
pub mod index;
pub mod pipeline;
pub mod retriever;

pub use chunker::Chunker;
pub use embedding::{DynEmbeddingGateway, EmbeddingGateway, MockEmbedding, OpenAiEmbedding};
pub use fingerprint::{FingerprintStore, MemoryFingerprintStore, SqliteFingerprintStore};
pub use generation::{
    Answer, DynGenerationGateway, EchoGeneration, GenerationGateway, GenerationRequest,
    OpenAiChat, RagChain,
};
pub use index::{cosine_similarity, RecordStore, VectorIndex};
pub use pipeline::IngestionPipeline;
pub use retriever::{format as format_context, Retriever, NO_CONTEXT_MARKER};
