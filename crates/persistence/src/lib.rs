//! SQLite persistence layer
//!
//! One local database file holds the durable state: ingested documents,
//! ingestion jobs, the query log with its evaluation results, stored test
//! sets, batch eval runs and cache hit/miss statistics. Every operation
//! opens a fresh connection (WAL journaling, foreign keys on), runs inside
//! `spawn_blocking`, commits and closes — simple over fast, with contention
//! bounded by SQLite's own locking.

pub mod cache_stats;
pub mod documents;
pub mod jobs;
pub mod queries;
pub mod schema;
pub mod store;
pub mod test_sets;

pub use cache_stats::CacheStatSummary;
pub use documents::{CollectionStats, DocumentRecord};
pub use jobs::{IngestionJob, JobUpdate};
pub use queries::{EvalResultRecord, MetricsRow, QueryLogRecord, TuningRow};
pub use store::Store;
pub use test_sets::{EvalRun, EvalRunAverages, TestQuestion, TestSet, TestSetSummary};

use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
