//! Test sets, batch evaluation and metrics endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use rag_engine_persistence::{EvalRun, MetricsRow, TestQuestion, TestSet, TestSetSummary};
use rag_engine_pipeline::{auto_generate_questions, create_test_set as create_test_set_inner};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTestSetRequest {
    pub name: String,
    pub collection: String,
    pub questions: Vec<TestQuestion>,
}

#[derive(Debug, Deserialize)]
pub struct AutoGenerateRequest {
    pub collection: String,
    #[serde(default = "default_num_questions")]
    pub num_questions: usize,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub test_set_name: Option<String>,
}

fn default_num_questions() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct BatchEvalRequest {
    pub test_set_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default)]
    pub test_set_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default = "default_metrics_limit")]
    pub limit: usize,
}

fn default_metrics_limit() -> usize {
    100
}

pub async fn create_test_set(
    State(state): State<AppState>,
    Json(request): Json<CreateTestSetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let created = create_test_set_inner(
        &state.store,
        &request.name,
        &request.collection,
        request.questions,
    )
    .await?;
    Ok(Json(serde_json::to_value(created).unwrap_or_default()))
}

pub async fn list_test_sets(
    State(state): State<AppState>,
) -> Result<Json<Vec<TestSetSummary>>, ApiError> {
    Ok(Json(state.store.list_test_sets().await?))
}

pub async fn get_test_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TestSet>, ApiError> {
    let test_set = state
        .store
        .test_set(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Test set not found"))?;
    Ok(Json(test_set))
}

pub async fn delete_test_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete_test_set(&id).await? {
        return Err(ApiError::not_found("Test set not found"));
    }
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

pub async fn auto_generate(
    State(state): State<AppState>,
    Json(request): Json<AutoGenerateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let questions = auto_generate_questions(
        &state.vector_store,
        &state.llm,
        &request.collection,
        request.num_questions,
        request.model.as_deref(),
    )
    .await;

    if let Some(name) = request.test_set_name.as_deref() {
        if !questions.is_empty() {
            let created =
                create_test_set_inner(&state.store, name, &request.collection, questions.clone())
                    .await?;
            let mut body = serde_json::to_value(created).unwrap_or_default();
            if let Some(map) = body.as_object_mut() {
                map.insert(
                    "questions".to_string(),
                    serde_json::to_value(&questions).unwrap_or_default(),
                );
            }
            return Ok(Json(body));
        }
    }

    Ok(Json(serde_json::json!({
        "questions": questions,
        "count": questions.len(),
    })))
}

pub async fn batch_evaluate(
    State(state): State<AppState>,
    Json(request): Json<BatchEvalRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Validate up front so a bad id is a 404, not a silently failed task.
    state
        .store
        .test_set(&request.test_set_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Test set not found"))?;

    let pipeline = state.pipeline.clone();
    let test_set_id = request.test_set_id.clone();
    let model = request.model.clone();
    tokio::spawn(async move {
        match pipeline.run_batch_eval(&test_set_id, model.as_deref()).await {
            Ok(report) => {
                tracing::info!(
                    run_id = %report.run_id,
                    evaluated = report.evaluated,
                    "Batch eval completed"
                );
            }
            Err(e) => {
                tracing::error!(test_set_id = %test_set_id, error = %e, "Batch eval failed");
            }
        }
    });

    Ok(Json(serde_json::json!({
        "status": "started",
        "test_set_id": request.test_set_id,
    })))
}

pub async fn list_eval_runs(
    State(state): State<AppState>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<Vec<EvalRun>>, ApiError> {
    Ok(Json(state.store.eval_runs(params.test_set_id.as_deref()).await?))
}

pub async fn metrics_summary(
    State(state): State<AppState>,
    Query(params): Query<MetricsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = state
        .store
        .metrics(params.collection.as_deref(), params.limit)
        .await?;

    Ok(Json(aggregate_metrics(&rows)))
}

pub async fn query_metrics(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<MetricsRow>, ApiError> {
    let row = state
        .store
        .query_metrics(&query_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Query not found"))?;
    Ok(Json(row))
}

fn aggregate_metrics(rows: &[MetricsRow]) -> serde_json::Value {
    if rows.is_empty() {
        return serde_json::json!({
            "total_queries": 0,
            "avg_faithfulness": null,
            "avg_relevance": null,
            "avg_hallucination_rate": null,
            "avg_latency_ms": null,
            "p50_latency_ms": null,
            "p95_latency_ms": null,
            "time_series": [],
        });
    }

    let mean = |values: &[f64]| -> Option<f64> {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };

    let faithfulness: Vec<f64> = rows.iter().filter_map(|r| r.faithfulness).collect();
    let relevance: Vec<f64> = rows.iter().filter_map(|r| r.relevance).collect();
    let hallucination: Vec<f64> = rows.iter().filter_map(|r| r.hallucination_rate).collect();
    let latencies: Vec<f64> = rows.iter().map(|r| r.latency_ms).collect();

    let mut sorted_latencies = latencies.clone();
    sorted_latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p50 = sorted_latencies.get(sorted_latencies.len() / 2).copied();
    let p95_idx = ((sorted_latencies.len() as f64) * 0.95) as usize;
    let p95 = sorted_latencies
        .get(p95_idx.min(sorted_latencies.len() - 1))
        .copied();

    let total_cost: f64 = rows.iter().map(|r| r.cost_usd).sum();

    let time_series: Vec<serde_json::Value> = rows
        .iter()
        .rev()
        .map(|r| {
            serde_json::json!({
                "query_id": r.id,
                "timestamp": r.created_at,
                "faithfulness": r.faithfulness,
                "relevance": r.relevance,
                "hallucination_rate": r.hallucination_rate,
                "latency_ms": r.latency_ms,
                "tokens_used": r.tokens_used,
                "cost_usd": r.cost_usd,
            })
        })
        .collect();

    serde_json::json!({
        "total_queries": rows.len(),
        "avg_faithfulness": mean(&faithfulness),
        "avg_relevance": mean(&relevance),
        "avg_hallucination_rate": mean(&hallucination),
        "avg_latency_ms": mean(&latencies),
        "p50_latency_ms": p50,
        "p95_latency_ms": p95,
        "total_cost_usd": (total_cost * 10_000.0).round() / 10_000.0,
        "avg_cost_per_query": (total_cost / rows.len() as f64 * 1_000_000.0).round() / 1_000_000.0,
        "time_series": time_series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, latency: f64, faithfulness: Option<f64>) -> MetricsRow {
        MetricsRow {
            id: id.to_string(),
            collection: "kb".to_string(),
            query: "q".to_string(),
            latency_ms: latency,
            latency_retrieval_ms: 1.0,
            latency_generation_ms: 2.0,
            tokens_used: 10,
            cost_usd: 0.01,
            created_at: 1.0,
            faithfulness,
            relevance: faithfulness,
            hallucination_rate: None,
            context_precision: None,
            context_recall: None,
        }
    }

    #[test]
    fn empty_rows_aggregate_to_nulls() {
        let summary = aggregate_metrics(&[]);
        assert_eq!(summary["total_queries"], 0);
        assert!(summary["avg_faithfulness"].is_null());
        assert_eq!(summary["time_series"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn aggregates_skip_missing_scores() {
        let rows = vec![
            row("a", 100.0, Some(0.8)),
            row("b", 200.0, None),
            row("c", 300.0, Some(0.6)),
        ];
        let summary = aggregate_metrics(&rows);

        assert_eq!(summary["total_queries"], 3);
        let avg = summary["avg_faithfulness"].as_f64().unwrap();
        assert!((avg - 0.7).abs() < 1e-9);
        assert_eq!(summary["p50_latency_ms"].as_f64().unwrap(), 200.0);
        let cost = summary["total_cost_usd"].as_f64().unwrap();
        assert!((cost - 0.03).abs() < 1e-9);
    }
}
