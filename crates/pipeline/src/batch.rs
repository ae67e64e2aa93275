//! Batch evaluation over stored test sets
//!
//! Runs every question of a test set through the full pipeline with
//! non-lightweight evaluation. Per-question failures are captured into the
//! run's results and do not stop the run; averages aggregate only the
//! successful questions.

use serde::Serialize;
use uuid::Uuid;

use rag_engine_persistence::{EvalRunAverages, TestSet};

use crate::metrics::compute_context_recall;
use crate::query::{QueryOptions, QueryPipeline};
use crate::PipelineError;

/// Summary returned once a batch run finishes.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub test_set_id: String,
    pub status: String,
    pub total_questions: usize,
    pub evaluated: usize,
    pub avg_faithfulness: Option<f64>,
    pub avg_relevance: Option<f64>,
    pub avg_hallucination_rate: Option<f64>,
    pub avg_context_precision: Option<f64>,
    pub results: serde_json::Value,
}

impl QueryPipeline {
    /// Execute a batch evaluation run for a stored test set.
    pub async fn run_batch_eval(
        &self,
        test_set_id: &str,
        model: Option<&str>,
    ) -> Result<BatchReport, PipelineError> {
        let test_set = self
            .store
            .test_set(test_set_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Test set not found: {}", test_set_id)))?;

        let run_id = Uuid::new_v4().to_string();
        self.store.insert_eval_run(&run_id, test_set_id).await?;

        match self.execute_batch(&run_id, &test_set, model).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let _ = self.store.fail_eval_run(&run_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn execute_batch(
        &self,
        run_id: &str,
        test_set: &TestSet,
        model: Option<&str>,
    ) -> Result<BatchReport, PipelineError> {
        let mut results: Vec<serde_json::Value> = Vec::new();
        let mut totals = (0.0, 0.0, 0.0, 0.0);
        let mut count = 0usize;

        for question in &test_set.questions {
            let outcome = self
                .run(
                    &question.question,
                    &test_set.collection,
                    QueryOptions {
                        model: model.map(str::to_string),
                        evaluate: true,
                        lightweight_eval: false,
                        ..Default::default()
                    },
                )
                .await;

            match outcome {
                Ok(mut query_result) => {
                    let Some(scores) = query_result.eval_scores.as_mut() else {
                        continue;
                    };

                    if let Some(ground_truth) = &question.ground_truth {
                        let context_chunks: Vec<String> = query_result
                            .sources
                            .as_array()
                            .map(|entries| {
                                entries
                                    .iter()
                                    .filter_map(|s| s.get("text"))
                                    .filter_map(|t| t.as_str())
                                    .map(str::to_string)
                                    .collect()
                            })
                            .unwrap_or_default();
                        scores.context_recall = Some(
                            compute_context_recall(&self.llm, ground_truth, &context_chunks, model)
                                .await,
                        );
                    }

                    results.push(serde_json::json!({
                        "question": question.question,
                        "answer": query_result.answer,
                        "ground_truth": question.ground_truth,
                        "faithfulness": scores.faithfulness,
                        "relevance": scores.relevance,
                        "hallucination_rate": scores.hallucination_rate,
                        "context_precision": scores.context_precision,
                        "context_recall": scores.context_recall,
                    }));

                    totals.0 += scores.faithfulness;
                    totals.1 += scores.relevance;
                    totals.2 += scores.hallucination_rate;
                    totals.3 += scores.context_precision;
                    count += 1;
                }
                Err(e) => {
                    tracing::error!(question = %question.question, error = %e, "Batch eval question failed");
                    results.push(serde_json::json!({
                        "question": question.question,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        let averages = if count > 0 {
            let n = count as f64;
            EvalRunAverages {
                avg_faithfulness: Some(totals.0 / n),
                avg_relevance: Some(totals.1 / n),
                avg_hallucination_rate: Some(totals.2 / n),
                avg_context_precision: Some(totals.3 / n),
            }
        } else {
            EvalRunAverages::default()
        };

        let results_json = serde_json::Value::Array(results);
        self.store
            .complete_eval_run(run_id, &results_json, averages)
            .await?;

        Ok(BatchReport {
            run_id: run_id.to_string(),
            test_set_id: test_set.id.clone(),
            status: "completed".to_string(),
            total_questions: test_set.questions.len(),
            evaluated: count,
            avg_faithfulness: averages.avg_faithfulness,
            avg_relevance: averages.avg_relevance,
            avg_hallucination_rate: averages.avg_hallucination_rate,
            avg_context_precision: averages.avg_context_precision,
            results: results_json,
        })
    }
}
