//! Hybrid retrieval
//!
//! Features:
//! - Dense vector search via Qdrant
//! - Sparse BM25 search over per-collection JSON-persisted indices
//! - Hybrid fusion with Reciprocal Rank Fusion and linear alpha weighting
//! - HTTP embeddings client (local Ollama-compatible or OpenAI)

pub mod embeddings;
pub mod hybrid;
pub mod sparse;
pub mod vector_store;

pub use embeddings::Embedder;
pub use hybrid::{
    reciprocal_rank_fusion, HybridRanker, RankedResult, RankerDefaults, SearchResult, RRF_K,
};
pub use sparse::{tokenize, Bm25Index, SparseRegistry, SparseResult};
pub use vector_store::{hash_point_id, VectorHit, VectorPoint, VectorStore};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Connection error: {0}")]
    Connection(String),
}
