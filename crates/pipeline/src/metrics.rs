//! Evaluation metrics
//!
//! Four LLM-judged scores (faithfulness, relevance, hallucination rate,
//! context recall) with deterministic token-overlap fallbacks when the
//! judge is unavailable, plus a purely lexical context precision. Judge
//! responses are reduced to their first numeric token, clamped to [0, 1].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use rag_engine_llm::{LlmRouter, Message};

/// Scores for one answered query. Every scalar lives in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalScores {
    pub faithfulness: f64,
    pub relevance: f64,
    pub hallucination_rate: f64,
    pub context_precision: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_recall: Option<f64>,
    pub latency_retrieval_ms: f64,
    pub latency_generation_ms: f64,
}

/// Inputs to a full evaluation pass.
pub struct EvalRequest<'a> {
    pub query: &'a str,
    pub answer: &'a str,
    pub context_chunks: &'a [String],
    pub ground_truth: Option<&'a str>,
    pub model: Option<&'a str>,
    pub lightweight: bool,
    pub latency_retrieval_ms: f64,
    pub latency_generation_ms: f64,
}

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.?\d*)").expect("static pattern"));

/// First numeric token clamped to [0, 1]; 0.5 when no number appears.
pub fn parse_score(text: &str) -> f64 {
    NUMBER
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
        .unwrap_or(0.5)
}

async fn judge(router: &LlmRouter, prompt: String, model: Option<&str>) -> Result<f64, String> {
    let messages = vec![Message::user(prompt)];
    match router.generate(&messages, model).await {
        Ok(response) => Ok(parse_score(&response.content)),
        Err(e) => Err(e.to_string()),
    }
}

/// Fraction of answer claims supported by the retrieved context.
pub async fn compute_faithfulness(
    router: &LlmRouter,
    query: &str,
    answer: &str,
    context_chunks: &[String],
    model: Option<&str>,
) -> f64 {
    if answer.trim().is_empty() || context_chunks.is_empty() {
        return 0.0;
    }

    let context = context_chunks.join("\n\n");
    let prompt = format!(
        "You are an evaluation judge. Assess whether the answer is faithful to the provided context.\n\n\
         Context:\n{context}\n\n\
         Question: {query}\n\n\
         Answer: {answer}\n\n\
         Rate the faithfulness of the answer on a scale of 0.0 to 1.0:\n\
         - 1.0 = Every claim in the answer is directly supported by the context\n\
         - 0.5 = Some claims are supported, some are not verifiable from context\n\
         - 0.0 = The answer contradicts or fabricates information not in the context\n\n\
         Respond with ONLY a number between 0.0 and 1.0."
    );

    match judge(router, prompt, model).await {
        Ok(score) => score,
        Err(e) => {
            tracing::warn!(error = %e, "Faithfulness judge failed, using heuristic");
            heuristic_faithfulness(answer, context_chunks)
        }
    }
}

/// Whether the answer addresses the question at all.
pub async fn compute_relevance(
    router: &LlmRouter,
    query: &str,
    answer: &str,
    model: Option<&str>,
) -> f64 {
    if answer.trim().is_empty() {
        return 0.0;
    }

    let prompt = format!(
        "You are an evaluation judge. Assess whether the answer is relevant to the question.\n\n\
         Question: {query}\n\n\
         Answer: {answer}\n\n\
         Rate the relevance of the answer on a scale of 0.0 to 1.0:\n\
         - 1.0 = The answer directly and completely addresses the question\n\
         - 0.5 = The answer partially addresses the question\n\
         - 0.0 = The answer is completely irrelevant to the question\n\n\
         Respond with ONLY a number between 0.0 and 1.0."
    );

    match judge(router, prompt, model).await {
        Ok(score) => score,
        Err(e) => {
            tracing::warn!(error = %e, "Relevance judge failed, using heuristic");
            heuristic_relevance(query, answer)
        }
    }
}

/// Fraction of answer sentences NOT grounded in the context.
pub async fn compute_hallucination_rate(
    router: &LlmRouter,
    answer: &str,
    context_chunks: &[String],
    model: Option<&str>,
) -> f64 {
    if answer.trim().is_empty() {
        return 0.0;
    }

    let context = context_chunks.join("\n\n");
    let prompt = format!(
        "You are an evaluation judge. Identify sentences in the answer that are NOT supported by the context.\n\n\
         Context:\n{context}\n\n\
         Answer: {answer}\n\n\
         For each sentence in the answer, determine if it is grounded in the context.\n\
         Count the total number of factual claim sentences and how many are NOT grounded.\n\n\
         Respond with ONLY a number between 0.0 and 1.0 representing the hallucination rate:\n\
         - 0.0 = No hallucination (all claims grounded in context)\n\
         - 1.0 = Complete hallucination (no claims grounded in context)"
    );

    match judge(router, prompt, model).await {
        Ok(score) => score,
        Err(e) => {
            tracing::warn!(error = %e, "Hallucination judge failed, using heuristic");
            heuristic_hallucination(answer, context_chunks)
        }
    }
}

/// Fraction of the ground truth recoverable from the retrieved context.
pub async fn compute_context_recall(
    router: &LlmRouter,
    ground_truth: &str,
    context_chunks: &[String],
    model: Option<&str>,
) -> f64 {
    if ground_truth.trim().is_empty() {
        return 0.0;
    }

    let context = context_chunks.join("\n\n");
    let prompt = format!(
        "You are an evaluation judge. Determine what fraction of the ground truth answer can be attributed to the retrieved context.\n\n\
         Ground Truth Answer: {ground_truth}\n\n\
         Retrieved Context:\n{context}\n\n\
         Rate the context recall on a scale of 0.0 to 1.0:\n\
         - 1.0 = All information in the ground truth is present in the context\n\
         - 0.5 = About half the ground truth information is in the context\n\
         - 0.0 = None of the ground truth information is in the context\n\n\
         Respond with ONLY a number between 0.0 and 1.0."
    );

    match judge(router, prompt, model).await {
        Ok(score) => score,
        Err(e) => {
            tracing::warn!(error = %e, "Context recall judge failed, defaulting to 0.5");
            0.5
        }
    }
}

/// Lexical context precision: a chunk counts as relevant when its token
/// overlap with the query reaches `max(1, 0.2 * |query terms|)`. Explicit
/// relevance labels short-circuit the heuristic.
pub fn compute_context_precision(
    query: &str,
    context_chunks: &[String],
    relevant_indices: Option<&[usize]>,
) -> f64 {
    if context_chunks.is_empty() {
        return 0.0;
    }

    if let Some(indices) = relevant_indices {
        return indices.len() as f64 / context_chunks.len() as f64;
    }

    let query_terms: HashSet<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
    // The threshold stays fractional; truncating it would admit chunks one
    // overlapping term short for 6+-term queries.
    let required = ((query_terms.len() as f64) * 0.2).max(1.0);

    let relevant = context_chunks
        .iter()
        .filter(|chunk| {
            let chunk_terms: HashSet<String> =
                chunk.to_lowercase().split_whitespace().map(str::to_string).collect();
            query_terms.intersection(&chunk_terms).count() as f64 >= required
        })
        .count();

    relevant as f64 / context_chunks.len() as f64
}

/// Run the configured evaluation pass.
///
/// Lightweight mode computes only faithfulness and relevance; the full
/// pass adds hallucination rate and context precision, and context recall
/// when a ground truth is supplied.
pub async fn evaluate_query(router: &LlmRouter, request: EvalRequest<'_>) -> EvalScores {
    let faithfulness = compute_faithfulness(
        router,
        request.query,
        request.answer,
        request.context_chunks,
        request.model,
    )
    .await;
    let relevance = compute_relevance(router, request.query, request.answer, request.model).await;

    let mut hallucination_rate = 0.0;
    let mut context_precision = 0.0;
    let mut context_recall = None;

    if !request.lightweight {
        hallucination_rate =
            compute_hallucination_rate(router, request.answer, request.context_chunks, request.model)
                .await;
        context_precision = compute_context_precision(request.query, request.context_chunks, None);

        if let Some(ground_truth) = request.ground_truth {
            context_recall = Some(
                compute_context_recall(router, ground_truth, request.context_chunks, request.model)
                    .await,
            );
        }
    }

    EvalScores {
        faithfulness,
        relevance,
        hallucination_rate,
        context_precision,
        context_recall,
        latency_retrieval_ms: request.latency_retrieval_ms,
        latency_generation_ms: request.latency_generation_ms,
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

/// Token-overlap fallback: share of answer words present in the context.
pub fn heuristic_faithfulness(answer: &str, context_chunks: &[String]) -> f64 {
    if context_chunks.is_empty() {
        return 0.0;
    }
    let answer_words = word_set(answer);
    if answer_words.is_empty() {
        return 0.0;
    }
    let context_words = word_set(&context_chunks.join(" "));
    let overlap = answer_words.intersection(&context_words).count();
    (overlap as f64 / answer_words.len() as f64).min(1.0)
}

/// Token-overlap fallback: share of query words echoed in the answer.
pub fn heuristic_relevance(query: &str, answer: &str) -> f64 {
    let query_words = word_set(query);
    if query_words.is_empty() {
        return 0.0;
    }
    let answer_words = word_set(answer);
    let overlap = query_words.intersection(&answer_words).count();
    (overlap as f64 / query_words.len() as f64).min(1.0)
}

/// Complement of heuristic faithfulness.
pub fn heuristic_hallucination(answer: &str, context_chunks: &[String]) -> f64 {
    (1.0 - heuristic_faithfulness(answer, context_chunks)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_score_reads_first_number() {
        assert_eq!(
            parse_score("The faithfulness score is 0.75 based on the analysis."),
            0.75
        );
        assert_eq!(parse_score("0.3"), 0.3);
    }

    #[test]
    fn parse_score_clamps_to_unit_interval() {
        assert_eq!(parse_score("5.0"), 1.0);
        assert_eq!(parse_score("42"), 1.0);
    }

    #[test]
    fn parse_score_defaults_without_numbers() {
        assert_eq!(parse_score(""), 0.5);
        assert_eq!(parse_score("no numeric verdict here"), 0.5);
    }

    #[test]
    fn context_precision_counts_overlapping_chunks() {
        let chunks = vec![
            "the capital of france is paris".to_string(),
            "unrelated cooking recipe".to_string(),
        ];
        let precision = compute_context_precision("capital of france", &chunks, None);
        assert!((precision - 0.5).abs() < 1e-9);
    }

    #[test]
    fn context_precision_threshold_stays_fractional() {
        // Seven query terms give a threshold of 1.4: a single overlapping
        // term must not count as relevant.
        let query = "alpha beta gamma delta epsilon zeta eta";
        let one_overlap = vec!["alpha unrelated words only".to_string()];
        assert_eq!(compute_context_precision(query, &one_overlap, None), 0.0);

        let two_overlaps = vec!["alpha beta unrelated words".to_string()];
        assert_eq!(compute_context_precision(query, &two_overlaps, None), 1.0);
    }

    #[test]
    fn context_precision_uses_explicit_labels() {
        let chunks = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let precision = compute_context_precision("q", &chunks, Some(&[0, 2]));
        assert!((precision - 0.5).abs() < 1e-9);
    }

    #[test]
    fn context_precision_of_empty_chunks_is_zero() {
        assert_eq!(compute_context_precision("q", &[], None), 0.0);
    }

    #[test]
    fn heuristic_faithfulness_rewards_overlap() {
        let chunks = vec!["paris is the capital of france".to_string()];
        let high = heuristic_faithfulness("paris is the capital", &chunks);
        let low = heuristic_faithfulness("quantum entanglement spectrum", &chunks);
        assert!(high > low);
        assert_eq!(heuristic_faithfulness("anything", &[]), 0.0);
    }

    #[test]
    fn heuristic_hallucination_is_complement() {
        let chunks = vec!["alpha beta gamma".to_string()];
        let f = heuristic_faithfulness("alpha beta", &chunks);
        let h = heuristic_hallucination("alpha beta", &chunks);
        assert!((f + h - 1.0).abs() < 1e-9);
    }

    #[test]
    fn heuristic_relevance_handles_empty_query() {
        assert_eq!(heuristic_relevance("", "some answer"), 0.0);
        assert!(heuristic_relevance("rust memory safety", "rust enforces memory safety") > 0.5);
    }
}
