//! Query pipeline and evaluation loop
//!
//! Composes cache lookup, hybrid retrieval, prompt construction,
//! generation, evaluation, persistence and cache write-back into one
//! staged flow with per-stage timing. Best-effort stages (cache, tuning,
//! persistence of stats) log and continue; retrieval, prompt building and
//! generation failures abort the request.

pub mod auto_tune;
pub mod batch;
pub mod cache;
pub mod metrics;
pub mod query;
pub mod test_sets;

pub use auto_tune::{optimal_params, param_analysis, ParamAnalysis, MIN_QUERIES_FOR_TUNING};
pub use batch::BatchReport;
pub use cache::{CacheStatsReport, CachedResult, QueryCache, CACHE_COLLECTION};
pub use metrics::{evaluate_query, parse_score, EvalRequest, EvalScores};
pub use query::{QueryOptions, QueryPipeline, QueryResult};
pub use test_sets::{auto_generate_questions, create_test_set, CreatedTestSet};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] rag_engine_retrieval::RetrievalError),

    #[error("LLM error: {0}")]
    Llm(#[from] rag_engine_llm::LlmError),

    #[error("Store error: {0}")]
    Store(#[from] rag_engine_persistence::StoreError),

    #[error("Not found: {0}")]
    NotFound(String),
}
