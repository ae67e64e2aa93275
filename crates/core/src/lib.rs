//! Core types shared across the RAG engine crates
//!
//! Keeps the chunk model and token accounting in one place so retrieval,
//! generation and ingestion agree on both.

pub mod tokens;
pub mod types;

pub use tokens::count_tokens;
pub use types::{now_epoch_secs, Chunk, Metadata};
