//! Fused retrieval endpoint

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use rag_engine_core::Metadata;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub source_filter: Option<String>,
}

fn default_collection() -> String {
    "documents".to_string()
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Serialize)]
pub struct ChunkResult {
    pub text: String,
    pub score: f32,
    pub vector_score: f32,
    pub sparse_score: f32,
    pub chunk_index: usize,
    pub metadata: Metadata,
}

#[derive(Debug, Serialize)]
pub struct RetrieveResponse {
    pub query: String,
    pub chunks: Vec<ChunkResult>,
    pub total_results: usize,
    pub retrieval_method: String,
}

pub async fn retrieve_chunks(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let results = state
        .pipeline
        .retrieve(
            &request.query,
            &request.collection,
            Some(request.top_k),
            request.alpha,
            request.source_filter.as_deref(),
        )
        .await?;

    let chunks: Vec<ChunkResult> = results
        .into_iter()
        .map(|r| ChunkResult {
            text: r.text,
            score: r.score,
            vector_score: r.vector_score,
            sparse_score: r.sparse_score,
            chunk_index: r.chunk_index,
            metadata: r.metadata,
        })
        .collect();

    let alpha = request.alpha.unwrap_or(state.settings.hybrid_alpha);
    Ok(Json(RetrieveResponse {
        query: request.query,
        total_results: chunks.len(),
        chunks,
        retrieval_method: format!("hybrid (alpha={})", alpha),
    }))
}
