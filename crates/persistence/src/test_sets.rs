//! Test sets and batch eval runs

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use rag_engine_core::now_epoch_secs;

use crate::{Store, StoreError};

/// One stored evaluation question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestQuestion {
    pub question: String,
    #[serde(default)]
    pub ground_truth: Option<String>,
}

/// A named set of evaluation questions against one collection.
#[derive(Debug, Clone, Serialize)]
pub struct TestSet {
    pub id: String,
    pub name: String,
    pub collection: String,
    pub questions: Vec<TestQuestion>,
    pub created_at: f64,
    pub updated_at: f64,
}

/// Listing row without the questions payload.
#[derive(Debug, Clone, Serialize)]
pub struct TestSetSummary {
    pub id: String,
    pub name: String,
    pub collection: String,
    pub created_at: f64,
    pub updated_at: f64,
}

/// Averages aggregated over a completed run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EvalRunAverages {
    pub avg_faithfulness: Option<f64>,
    pub avg_relevance: Option<f64>,
    pub avg_hallucination_rate: Option<f64>,
    pub avg_context_precision: Option<f64>,
}

/// One batch evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvalRun {
    pub id: String,
    pub test_set_id: String,
    pub status: String,
    pub avg_faithfulness: Option<f64>,
    pub avg_relevance: Option<f64>,
    pub avg_hallucination_rate: Option<f64>,
    pub avg_context_precision: Option<f64>,
    pub created_at: f64,
    pub completed_at: Option<f64>,
}

impl Store {
    /// Insert a test set; the unique name constraint surfaces as an error.
    pub async fn insert_test_set(
        &self,
        id: &str,
        name: &str,
        collection: &str,
        questions: &[TestQuestion],
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let name = name.to_string();
        let collection = collection.to_string();
        let questions_json = serde_json::to_string(questions)?;
        self.with_conn(move |conn| {
            let now = now_epoch_secs();
            conn.execute(
                "INSERT INTO test_sets (id, name, collection, questions, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, name, collection, questions_json, now, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn test_set(&self, id: &str) -> Result<Option<TestSet>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, collection, questions, created_at, updated_at
                     FROM test_sets WHERE id = ?1",
                    [id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, f64>(4)?,
                            row.get::<_, f64>(5)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((id, name, collection, questions, created_at, updated_at)) => {
                    let questions: Vec<TestQuestion> = serde_json::from_str(&questions)?;
                    Ok(Some(TestSet {
                        id,
                        name,
                        collection,
                        questions,
                        created_at,
                        updated_at,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_test_sets(&self) -> Result<Vec<TestSetSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, collection, created_at, updated_at
                 FROM test_sets ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(TestSetSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        collection: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Delete by id; false when nothing matched.
    pub async fn delete_test_set(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM test_sets WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Create a run in `running` state.
    pub async fn insert_eval_run(&self, id: &str, test_set_id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let test_set_id = test_set_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO eval_runs (id, test_set_id, status, created_at)
                 VALUES (?1, ?2, 'running', ?3)",
                params![id, test_set_id, now_epoch_secs()],
            )?;
            Ok(())
        })
        .await
    }

    /// Mark a run completed with its per-question results and averages.
    pub async fn complete_eval_run(
        &self,
        id: &str,
        results: &serde_json::Value,
        averages: EvalRunAverages,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let results_json = serde_json::to_string(results)?;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE eval_runs
                 SET status = 'completed', results = ?1, completed_at = ?2,
                     avg_faithfulness = ?3, avg_relevance = ?4,
                     avg_hallucination_rate = ?5, avg_context_precision = ?6
                 WHERE id = ?7",
                params![
                    results_json,
                    now_epoch_secs(),
                    averages.avg_faithfulness,
                    averages.avg_relevance,
                    averages.avg_hallucination_rate,
                    averages.avg_context_precision,
                    id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Mark a run failed, recording the error in its results payload.
    pub async fn fail_eval_run(&self, id: &str, error: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let results = serde_json::to_string(&serde_json::json!([{ "error": error }]))?;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE eval_runs
                 SET status = 'failed', results = ?1, completed_at = ?2
                 WHERE id = ?3",
                params![results, now_epoch_secs(), id],
            )?;
            Ok(())
        })
        .await
    }

    /// Runs, optionally filtered by test set, newest first.
    pub async fn eval_runs(
        &self,
        test_set_id: Option<&str>,
    ) -> Result<Vec<EvalRun>, StoreError> {
        let test_set_id = test_set_id.map(str::to_string);
        self.with_conn(move |conn| {
            let base = "SELECT id, test_set_id, status, avg_faithfulness, avg_relevance,
                               avg_hallucination_rate, avg_context_precision,
                               created_at, completed_at
                        FROM eval_runs";

            let map_row = |row: &rusqlite::Row<'_>| {
                Ok(EvalRun {
                    id: row.get(0)?,
                    test_set_id: row.get(1)?,
                    status: row.get(2)?,
                    avg_faithfulness: row.get(3)?,
                    avg_relevance: row.get(4)?,
                    avg_hallucination_rate: row.get(5)?,
                    avg_context_precision: row.get(6)?,
                    created_at: row.get(7)?,
                    completed_at: row.get(8)?,
                })
            };

            let rows = match test_set_id {
                Some(ts) => {
                    let sql = format!("{} WHERE test_set_id = ?1 ORDER BY created_at DESC", base);
                    let mut stmt = conn.prepare(&sql)?;
                    let result = stmt.query_map([ts], map_row)?.collect::<Result<Vec<_>, _>>()?;
                    result
                }
                None => {
                    let sql = format!("{} ORDER BY created_at DESC", base);
                    let mut stmt = conn.prepare(&sql)?;
                    let result = stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?;
                    result
                }
            };
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn questions() -> Vec<TestQuestion> {
        vec![
            TestQuestion {
                question: "What is BM25?".to_string(),
                ground_truth: Some("A lexical scoring function".to_string()),
            },
            TestQuestion {
                question: "What is RRF?".to_string(),
                ground_truth: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_set_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store
            .insert_test_set("ts1", "baseline", "kb", &questions())
            .await
            .unwrap();

        let loaded = store.test_set("ts1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "baseline");
        assert_eq!(loaded.questions.len(), 2);
        assert_eq!(
            loaded.questions[0].ground_truth.as_deref(),
            Some("A lexical scoring function")
        );

        let listed = store.list_test_sets().await.unwrap();
        assert_eq!(listed.len(), 1);

        assert!(store.delete_test_set("ts1").await.unwrap());
        assert!(!store.delete_test_set("ts1").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store
            .insert_test_set("ts1", "baseline", "kb", &questions())
            .await
            .unwrap();
        let dup = store
            .insert_test_set("ts2", "baseline", "kb", &questions())
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn eval_run_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store
            .insert_test_set("ts1", "baseline", "kb", &questions())
            .await
            .unwrap();
        store.insert_eval_run("run1", "ts1").await.unwrap();

        let runs = store.eval_runs(Some("ts1")).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "running");

        store
            .complete_eval_run(
                "run1",
                &serde_json::json!([{"question": "What is BM25?", "faithfulness": 0.9}]),
                EvalRunAverages {
                    avg_faithfulness: Some(0.9),
                    avg_relevance: Some(0.8),
                    avg_hallucination_rate: Some(0.05),
                    avg_context_precision: Some(0.7),
                },
            )
            .await
            .unwrap();

        let runs = store.eval_runs(None).await.unwrap();
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].avg_faithfulness, Some(0.9));
        assert!(runs[0].completed_at.is_some());
    }
}
