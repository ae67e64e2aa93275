//! Document ingestion
//!
//! Loads uploaded files, splits them into token-budgeted chunks, embeds
//! and indexes them (dense + sparse), and records the outcome in the
//! relational store. Ingestion runs as a background task; callers track
//! progress through the job row.

pub mod chunker;
pub mod loader;
pub mod worker;

pub use chunker::{chunk_document_pages, chunk_text};
pub use loader::{is_supported, load_document, LoadedDocument, SUPPORTED_EXTENSIONS};
pub use worker::{ingest_text, process_ingestion, IngestContext, TextIngestReport};

use thiserror::Error;

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] rag_engine_retrieval::RetrievalError),

    #[error("Store error: {0}")]
    Store(#[from] rag_engine_persistence::StoreError),
}
