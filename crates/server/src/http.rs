//! Router assembly and shared middleware

use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    // Uploads can carry several files up to the per-file cap each.
    let upload_limit = state.settings.max_file_size_mb as usize
        * 1024
        * 1024
        * state.settings.max_files_per_upload.max(1);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/api/settings", get(routes::system::settings))
        .route("/api/models", get(routes::system::models))
        // Ingestion
        .route("/api/ingest", post(routes::ingest::ingest_documents))
        .route("/api/ingest/:job_id", get(routes::ingest::job_status))
        .route("/api/collections", get(routes::ingest::list_collections))
        .route(
            "/api/collections/:name",
            delete(routes::ingest::delete_collection),
        )
        // Retrieval + query
        .route("/api/retrieve", post(routes::retrieve::retrieve_chunks))
        .route("/api/query", post(routes::query::query_rag))
        // Evaluation
        .route(
            "/api/test-sets",
            post(routes::evaluate::create_test_set).get(routes::evaluate::list_test_sets),
        )
        .route(
            "/api/test-sets/auto-generate",
            post(routes::evaluate::auto_generate),
        )
        .route(
            "/api/test-sets/:id",
            get(routes::evaluate::get_test_set).delete(routes::evaluate::delete_test_set),
        )
        .route("/api/evaluate/batch", post(routes::evaluate::batch_evaluate))
        .route("/api/evaluate/runs", get(routes::evaluate::list_eval_runs))
        .route("/api/metrics", get(routes::evaluate::metrics_summary))
        .route("/api/metrics/:query_id", get(routes::evaluate::query_metrics))
        // Cache
        .route("/api/cache/stats", get(routes::system::cache_stats))
        .route("/api/cache", delete(routes::system::clear_cache))
        // Tuning
        .route(
            "/api/retrieval/optimal-params",
            get(routes::system::optimal_params),
        )
        .layer(middleware::from_fn(add_response_time))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

/// Stamp wall time in milliseconds onto every response.
async fn add_response_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("{:.1}ms", elapsed_ms)) {
        response.headers_mut().insert("x-response-time", value);
    }
    response
}
