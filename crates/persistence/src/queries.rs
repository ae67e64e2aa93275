//! Query log, eval results and the metrics join

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use rag_engine_core::now_epoch_secs;

use crate::{Store, StoreError};

/// One answered query.
#[derive(Debug, Clone)]
pub struct QueryLogRecord {
    pub id: String,
    pub collection: String,
    pub query: String,
    pub answer: String,
    /// JSON array of source entries.
    pub sources: serde_json::Value,
    pub model: String,
    pub tokens_used: i64,
    pub latency_ms: f64,
    pub latency_retrieval_ms: f64,
    pub latency_generation_ms: f64,
    pub cost_usd: f64,
    pub alpha: f64,
    pub top_k: i64,
}

/// Scores attached to a logged query.
#[derive(Debug, Clone)]
pub struct EvalResultRecord {
    pub id: String,
    pub query_id: String,
    pub faithfulness: Option<f64>,
    pub relevance: Option<f64>,
    pub hallucination_rate: Option<f64>,
    pub context_precision: Option<f64>,
    pub context_recall: Option<f64>,
}

/// Query log joined with its eval result (if any).
#[derive(Debug, Clone, Serialize)]
pub struct MetricsRow {
    pub id: String,
    pub collection: String,
    pub query: String,
    pub latency_ms: f64,
    pub latency_retrieval_ms: f64,
    pub latency_generation_ms: f64,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub created_at: f64,
    pub faithfulness: Option<f64>,
    pub relevance: Option<f64>,
    pub hallucination_rate: Option<f64>,
    pub context_precision: Option<f64>,
    pub context_recall: Option<f64>,
}

/// Input row for the auto-tuner.
#[derive(Debug, Clone, Copy)]
pub struct TuningRow {
    pub alpha: f64,
    pub top_k: Option<i64>,
    pub faithfulness: f64,
    pub relevance: f64,
}

impl Store {
    pub async fn insert_query_log(&self, record: QueryLogRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO query_log
                 (id, collection, query, answer, sources, model, tokens_used,
                  latency_ms, latency_retrieval_ms, latency_generation_ms,
                  cost_usd, alpha, top_k, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.collection,
                    record.query,
                    record.answer,
                    serde_json::to_string(&record.sources)?,
                    record.model,
                    record.tokens_used,
                    record.latency_ms,
                    record.latency_retrieval_ms,
                    record.latency_generation_ms,
                    record.cost_usd,
                    record.alpha,
                    record.top_k,
                    now_epoch_secs(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn insert_eval_result(&self, record: EvalResultRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO eval_results
                 (id, query_id, faithfulness, relevance, hallucination_rate,
                  context_precision, context_recall, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.query_id,
                    record.faithfulness,
                    record.relevance,
                    record.hallucination_rate,
                    record.context_precision,
                    record.context_recall,
                    now_epoch_secs(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Recent queries with their eval scores, newest first.
    pub async fn metrics(
        &self,
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MetricsRow>, StoreError> {
        let collection = collection.map(str::to_string);
        self.with_conn(move |conn| {
            let base = "SELECT q.id, q.collection, q.query, q.latency_ms,
                               q.latency_retrieval_ms, q.latency_generation_ms,
                               q.tokens_used, q.cost_usd, q.created_at,
                               e.faithfulness, e.relevance, e.hallucination_rate,
                               e.context_precision, e.context_recall
                        FROM query_log q
                        LEFT JOIN eval_results e ON e.query_id = q.id";

            let map_row = |row: &rusqlite::Row<'_>| {
                Ok(MetricsRow {
                    id: row.get(0)?,
                    collection: row.get(1)?,
                    query: row.get(2)?,
                    latency_ms: row.get(3)?,
                    latency_retrieval_ms: row.get(4)?,
                    latency_generation_ms: row.get(5)?,
                    tokens_used: row.get(6)?,
                    cost_usd: row.get(7)?,
                    created_at: row.get(8)?,
                    faithfulness: row.get(9)?,
                    relevance: row.get(10)?,
                    hallucination_rate: row.get(11)?,
                    context_precision: row.get(12)?,
                    context_recall: row.get(13)?,
                })
            };

            let rows = match collection {
                Some(name) => {
                    let sql = format!(
                        "{} WHERE q.collection = ?1 ORDER BY q.created_at DESC LIMIT ?2",
                        base
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let result = stmt
                        .query_map(params![name, limit as i64], map_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    result
                }
                None => {
                    let sql = format!("{} ORDER BY q.created_at DESC LIMIT ?1", base);
                    let mut stmt = conn.prepare(&sql)?;
                    let result = stmt
                        .query_map(params![limit as i64], map_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    result
                }
            };
            Ok(rows)
        })
        .await
    }

    /// One query's metrics row by id.
    pub async fn query_metrics(&self, query_id: &str) -> Result<Option<MetricsRow>, StoreError> {
        let query_id = query_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT q.id, q.collection, q.query, q.latency_ms,
                            q.latency_retrieval_ms, q.latency_generation_ms,
                            q.tokens_used, q.cost_usd, q.created_at,
                            e.faithfulness, e.relevance, e.hallucination_rate,
                            e.context_precision, e.context_recall
                     FROM query_log q
                     LEFT JOIN eval_results e ON e.query_id = q.id
                     WHERE q.id = ?1",
                    [query_id],
                    |row| {
                        Ok(MetricsRow {
                            id: row.get(0)?,
                            collection: row.get(1)?,
                            query: row.get(2)?,
                            latency_ms: row.get(3)?,
                            latency_retrieval_ms: row.get(4)?,
                            latency_generation_ms: row.get(5)?,
                            tokens_used: row.get(6)?,
                            cost_usd: row.get(7)?,
                            created_at: row.get(8)?,
                            faithfulness: row.get(9)?,
                            relevance: row.get(10)?,
                            hallucination_rate: row.get(11)?,
                            context_precision: row.get(12)?,
                            context_recall: row.get(13)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Rows eligible for auto-tuning: alpha and both quality scores
    /// present, newest first, capped at `limit`.
    pub async fn tuning_rows(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<TuningRow>, StoreError> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT q.alpha, q.top_k, e.faithfulness, e.relevance
                 FROM query_log q
                 JOIN eval_results e ON e.query_id = q.id
                 WHERE q.collection = ?1
                   AND q.alpha IS NOT NULL
                   AND e.faithfulness IS NOT NULL
                   AND e.relevance IS NOT NULL
                 ORDER BY q.created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![collection, limit as i64], |row| {
                    Ok(TuningRow {
                        alpha: row.get(0)?,
                        top_k: row.get(1)?,
                        faithfulness: row.get(2)?,
                        relevance: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, collection: &str, alpha: f64) -> QueryLogRecord {
        QueryLogRecord {
            id: id.to_string(),
            collection: collection.to_string(),
            query: "what is rust".to_string(),
            answer: "a systems language".to_string(),
            sources: serde_json::json!([]),
            model: "qwen2.5-coder:14b".to_string(),
            tokens_used: 42,
            latency_ms: 120.0,
            latency_retrieval_ms: 20.0,
            latency_generation_ms: 90.0,
            cost_usd: 0.0,
            alpha,
            top_k: 5,
        }
    }

    fn eval(id: &str, query_id: &str, faithfulness: f64, relevance: f64) -> EvalResultRecord {
        EvalResultRecord {
            id: id.to_string(),
            query_id: query_id.to_string(),
            faithfulness: Some(faithfulness),
            relevance: Some(relevance),
            hallucination_rate: Some(0.1),
            context_precision: Some(0.8),
            context_recall: None,
        }
    }

    #[tokio::test]
    async fn metrics_join_includes_eval_scores() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store.insert_query_log(record("q1", "kb", 0.7)).await.unwrap();
        store.insert_eval_result(eval("e1", "q1", 0.9, 0.8)).await.unwrap();
        store.insert_query_log(record("q2", "kb", 0.7)).await.unwrap();

        let rows = store.metrics(Some("kb"), 100).await.unwrap();
        assert_eq!(rows.len(), 2);
        let with_eval = rows.iter().find(|r| r.id == "q1").unwrap();
        assert_eq!(with_eval.faithfulness, Some(0.9));
        let without_eval = rows.iter().find(|r| r.id == "q2").unwrap();
        assert!(without_eval.faithfulness.is_none());

        assert!(store.metrics(Some("empty"), 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_query_lookup_finds_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store.insert_query_log(record("q1", "kb", 0.5)).await.unwrap();
        let row = store.query_metrics("q1").await.unwrap().unwrap();
        assert_eq!(row.collection, "kb");
        assert!(store.query_metrics("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tuning_rows_require_eval_scores() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store.insert_query_log(record("q1", "kb", 0.7)).await.unwrap();
        store.insert_eval_result(eval("e1", "q1", 0.9, 0.8)).await.unwrap();
        store.insert_query_log(record("q2", "kb", 0.3)).await.unwrap();

        let rows = store.tuning_rows("kb", 500).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].alpha, 0.7);
        assert_eq!(rows[0].top_k, Some(5));
    }

    #[tokio::test]
    async fn eval_result_requires_existing_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        let err = store.insert_eval_result(eval("e1", "ghost", 0.5, 0.5)).await;
        assert!(err.is_err(), "foreign key violation must surface");
    }
}
