//! Query pipeline
//!
//! Stage order: cache lookup, optional auto-tune, timed retrieval, prompt
//! build, timed generation, optional evaluation, persistence (query log
//! before eval result), best-effort cache write-back. Cache hits return
//! immediately with zeroed stage latencies and no fresh eval.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use rag_engine_config::Settings;
use rag_engine_core::now_epoch_secs;
use rag_engine_llm::{build_prompt, format_messages, LlmRouter};
use rag_engine_persistence::{EvalResultRecord, QueryLogRecord, Store};
use rag_engine_retrieval::{HybridRanker, RankedResult};

use crate::auto_tune::optimal_params;
use crate::cache::{CachedResult, QueryCache};
use crate::metrics::{evaluate_query, EvalRequest, EvalScores};
use crate::PipelineError;

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub model: Option<String>,
    pub evaluate: bool,
    pub lightweight_eval: bool,
    pub alpha: Option<f64>,
    pub auto_tune: bool,
}

/// Final pipeline output.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query_id: String,
    pub answer: String,
    pub sources: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_scores: Option<EvalScores>,
    pub tokens_used: i64,
    pub latency_ms: f64,
    pub latency_retrieval_ms: f64,
    pub latency_generation_ms: f64,
    pub model: String,
    pub cache_hit: bool,
    pub cost_usd: f64,
}

/// The assembled query pipeline.
pub struct QueryPipeline {
    pub(crate) ranker: Arc<HybridRanker>,
    pub(crate) llm: Arc<LlmRouter>,
    pub(crate) cache: Arc<QueryCache>,
    pub(crate) store: Store,
    pub(crate) settings: Arc<Settings>,
}

impl QueryPipeline {
    pub fn new(
        ranker: Arc<HybridRanker>,
        llm: Arc<LlmRouter>,
        cache: Arc<QueryCache>,
        store: Store,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            ranker,
            llm,
            cache,
            store,
            settings,
        }
    }

    pub fn ranker(&self) -> &HybridRanker {
        &self.ranker
    }

    pub fn llm(&self) -> &LlmRouter {
        &self.llm
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the full pipeline for one query.
    pub async fn run(
        &self,
        query: &str,
        collection: &str,
        options: QueryOptions,
    ) -> Result<QueryResult, PipelineError> {
        let query_id = Uuid::new_v4().to_string();
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.llm.default_model().to_string());
        let start = Instant::now();

        if let Some(cached) = self.cache.lookup(query, collection).await {
            let latency_ms = elapsed_ms(start);
            tracing::info!(collection, latency_ms, "Cache hit");
            return Ok(QueryResult {
                query_id,
                answer: cached.answer,
                sources: cached.sources,
                eval_scores: None,
                tokens_used: cached.tokens_used,
                latency_ms,
                latency_retrieval_ms: 0.0,
                latency_generation_ms: 0.0,
                model: cached.model,
                cache_hit: true,
                cost_usd: 0.0,
            });
        }

        let mut effective_alpha = options.alpha;
        let mut effective_top_k = options.top_k;
        if options.auto_tune {
            let (tuned_alpha, tuned_top_k) = optimal_params(&self.store, collection).await;
            if tuned_alpha.is_some() {
                effective_alpha = tuned_alpha;
            }
            if let Some(k) = tuned_top_k {
                effective_top_k = Some(k as usize);
            }
        }

        let retrieval_start = Instant::now();
        let results = self
            .ranker
            .search(query, collection, effective_top_k, effective_alpha, None)
            .await?;
        let latency_retrieval_ms = elapsed_ms(retrieval_start);

        let (system_prompt, user_prompt, sources) =
            build_prompt(query, &results, self.settings.max_context_tokens);
        let messages = format_messages(&system_prompt, &user_prompt);

        let generation_start = Instant::now();
        let llm_response = self.llm.generate(&messages, Some(&model)).await?;
        let latency_generation_ms = elapsed_ms(generation_start);

        let latency_ms = elapsed_ms(start);

        let eval_scores = if options.evaluate {
            let context_chunks: Vec<String> = results.iter().map(|r| r.text.clone()).collect();
            Some(
                evaluate_query(
                    &self.llm,
                    EvalRequest {
                        query,
                        answer: &llm_response.content,
                        context_chunks: &context_chunks,
                        ground_truth: None,
                        model: Some(&model),
                        lightweight: options.lightweight_eval,
                        latency_retrieval_ms,
                        latency_generation_ms,
                    },
                )
                .await,
            )
        } else {
            None
        };

        let sources_json = serde_json::to_value(&sources).unwrap_or_else(|_| serde_json::json!([]));
        let used_alpha = effective_alpha.unwrap_or(self.settings.hybrid_alpha);
        let used_top_k = effective_top_k.unwrap_or(self.settings.default_top_k) as i64;

        self.persist(
            &query_id,
            query,
            collection,
            &llm_response.content,
            &sources_json,
            &model,
            llm_response.tokens_used as i64,
            latency_ms,
            latency_retrieval_ms,
            latency_generation_ms,
            llm_response.cost_usd,
            used_alpha,
            used_top_k,
            eval_scores.as_ref(),
        )
        .await;

        let cached_eval = eval_scores.as_ref().map(|scores| {
            serde_json::json!({
                "faithfulness": scores.faithfulness,
                "relevance": scores.relevance,
                "hallucination_rate": scores.hallucination_rate,
            })
        });
        self.cache
            .store_result(
                query,
                collection,
                CachedResult {
                    answer: llm_response.content.clone(),
                    sources: sources_json.clone(),
                    eval_scores: cached_eval,
                    model: model.clone(),
                    created_at: now_epoch_secs(),
                    tokens_used: llm_response.tokens_used as i64,
                    latency_ms,
                },
            )
            .await;

        Ok(QueryResult {
            query_id,
            answer: llm_response.content,
            sources: sources_json,
            eval_scores,
            tokens_used: llm_response.tokens_used as i64,
            latency_ms,
            latency_retrieval_ms,
            latency_generation_ms,
            model,
            cache_hit: false,
            cost_usd: llm_response.cost_usd,
        })
    }

    /// Persist the query log and, if present, its eval result. Failures
    /// are logged and swallowed; the answer still goes back to the caller.
    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        query_id: &str,
        query: &str,
        collection: &str,
        answer: &str,
        sources: &serde_json::Value,
        model: &str,
        tokens_used: i64,
        latency_ms: f64,
        latency_retrieval_ms: f64,
        latency_generation_ms: f64,
        cost_usd: f64,
        alpha: f64,
        top_k: i64,
        eval_scores: Option<&EvalScores>,
    ) {
        let log_result = self
            .store
            .insert_query_log(QueryLogRecord {
                id: query_id.to_string(),
                collection: collection.to_string(),
                query: query.to_string(),
                answer: answer.to_string(),
                sources: sources.clone(),
                model: model.to_string(),
                tokens_used,
                latency_ms,
                latency_retrieval_ms,
                latency_generation_ms,
                cost_usd,
                alpha,
                top_k,
            })
            .await;

        if let Err(e) = log_result {
            tracing::warn!(error = %e, "Failed to persist query log");
            return;
        }

        if let Some(scores) = eval_scores {
            let eval_result = self
                .store
                .insert_eval_result(EvalResultRecord {
                    id: Uuid::new_v4().to_string(),
                    query_id: query_id.to_string(),
                    faithfulness: Some(scores.faithfulness),
                    relevance: Some(scores.relevance),
                    hallucination_rate: Some(scores.hallucination_rate),
                    context_precision: Some(scores.context_precision),
                    context_recall: scores.context_recall,
                })
                .await;
            if let Err(e) = eval_result {
                tracing::warn!(error = %e, "Failed to persist eval result");
            }
        }
    }

    /// Retrieval without generation, for the retrieve endpoint and tools.
    pub async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        top_k: Option<usize>,
        alpha: Option<f64>,
        source_filter: Option<&str>,
    ) -> Result<Vec<RankedResult>, PipelineError> {
        Ok(self
            .ranker
            .search(query, collection, top_k, alpha, source_filter)
            .await?)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
