//! Health, settings, models, cache and tuning endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use rag_engine_pipeline::{param_analysis, CacheStatsReport, ParamAnalysis};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ollama_ok = state.llm.local_health().await;
    Json(serde_json::json!({
        "status": "healthy",
        "ollama": if ollama_ok { "connected" } else { "disconnected" },
        "embedding_model": state.embedder.model_id(),
        "default_llm": state.settings.default_model,
        "eval_enabled": state.settings.eval_on_query,
    }))
}

pub async fn settings(State(state): State<AppState>) -> Json<serde_json::Value> {
    let s = &state.settings;
    Json(serde_json::json!({
        "embedding_model": state.embedder.model_id(),
        "chunking_strategy": s.chunking_strategy,
        "chunk_size": s.chunk_size,
        "chunk_overlap": s.chunk_overlap,
        "default_model": s.default_model,
        "hybrid_alpha": s.hybrid_alpha,
        "default_top_k": s.default_top_k,
        "eval_on_query": s.eval_on_query,
        "eval_lightweight": s.eval_lightweight,
        "use_reranker": s.use_reranker,
        "cache_enabled": s.cache_enabled,
        "cache_threshold": s.cache_threshold,
        "cache_ttl_seconds": s.cache_ttl_seconds,
    }))
}

pub async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let models = state.llm.local_models().await;
    Json(serde_json::json!(models))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsReport> {
    Json(state.cache.stats().await)
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.cache.clear().await;
    Json(serde_json::json!({
        "status": "cleared",
        "entries_removed": removed,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OptimalParamsQuery {
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "documents".to_string()
}

pub async fn optimal_params(
    State(state): State<AppState>,
    Query(params): Query<OptimalParamsQuery>,
) -> Json<ParamAnalysis> {
    Json(param_analysis(&state.store, &params.collection).await)
}
