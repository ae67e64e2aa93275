//! Hybrid ranker
//!
//! Fans out to dense (Qdrant) and sparse (BM25) search, fuses the two
//! ranked lists with Reciprocal Rank Fusion and a linear alpha weighting,
//! dedupes by canonical text key, and cuts to top-k. A failed sub-search
//! degrades to the other side's results instead of failing the query.

use std::collections::HashMap;
use std::sync::Arc;

use rag_engine_core::Metadata;

use crate::embeddings::Embedder;
use crate::sparse::{SparseRegistry, SparseResult};
use crate::vector_store::VectorStore;
use crate::RetrievalError;

/// RRF rank constant.
pub const RRF_K: f32 = 60.0;

/// Candidate multiplier: each side is asked for `3 * top_k` results.
const FETCH_MULTIPLIER: usize = 3;

/// Dense search hit, payload unpacked.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub text: String,
    pub score: f32,
    pub chunk_index: usize,
    pub metadata: Metadata,
}

/// Fused result carrying both sub-scores.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub text: String,
    pub score: f32,
    pub vector_score: f32,
    pub sparse_score: f32,
    pub chunk_index: usize,
    pub metadata: Metadata,
}

/// Default retrieval parameters, resolved from settings at construction.
#[derive(Debug, Clone, Copy)]
pub struct RankerDefaults {
    pub top_k: usize,
    pub alpha: f64,
}

/// Hybrid retriever over one vector store and one sparse registry.
pub struct HybridRanker {
    embedder: Arc<Embedder>,
    vector_store: Arc<VectorStore>,
    sparse: Arc<SparseRegistry>,
    defaults: RankerDefaults,
}

impl HybridRanker {
    pub fn new(
        embedder: Arc<Embedder>,
        vector_store: Arc<VectorStore>,
        sparse: Arc<SparseRegistry>,
        defaults: RankerDefaults,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            sparse,
            defaults,
        }
    }

    /// Hybrid search with RRF fusion.
    ///
    /// `top_k` and `alpha` fall back to configured defaults. The result is
    /// ordered by non-increasing fused score and deduplicated.
    pub async fn search(
        &self,
        query: &str,
        collection: &str,
        top_k: Option<usize>,
        alpha: Option<f64>,
        source_filter: Option<&str>,
    ) -> Result<Vec<RankedResult>, RetrievalError> {
        let k = top_k.unwrap_or(self.defaults.top_k);
        let alpha = alpha.unwrap_or(self.defaults.alpha) as f32;
        let fetch_k = k * FETCH_MULTIPLIER;

        let dense = match self.search_dense(query, collection, fetch_k, source_filter).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(collection, error = %e, "Dense search failed, using sparse only");
                Vec::new()
            }
        };

        let sparse = self.sparse.search(collection, query, fetch_k);

        Ok(reciprocal_rank_fusion(&dense, &sparse, alpha, k, RRF_K))
    }

    /// Dense-only search with payload unpacking.
    pub async fn search_dense(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let embedding = self.embedder.embed_one(query).await?;
        let hits = self
            .vector_store
            .search(collection, &embedding, top_k, source_filter)
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let mut payload = hit.payload;
                let text = payload
                    .remove("text")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let chunk_index = payload
                    .get("chunk_index")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .unwrap_or(0);
                SearchResult {
                    text,
                    score: hit.score,
                    chunk_index,
                    metadata: payload,
                }
            })
            .collect())
    }
}

/// Canonical dedup key: first 200 characters, trimmed, lowercased.
fn result_key(text: &str) -> String {
    let prefix: String = text.chars().take(200).collect();
    prefix.trim().to_lowercase()
}

struct FusionEntry {
    text: String,
    vector_rrf: f32,
    sparse_rrf: f32,
    vector_score: f32,
    sparse_score: f32,
    chunk_index: usize,
    metadata: Metadata,
}

/// Fuse two ranked lists with RRF.
///
/// Each source contributes `1 / (rrf_k + rank + 1)` for its 0-based rank;
/// the fused score is `alpha * vector_rrf + (1 - alpha) * sparse_rrf`.
/// Entries sharing a canonical key merge and keep both sub-scores. The sort
/// is stable, so equal scores keep first-seen order (vector list first).
pub fn reciprocal_rank_fusion(
    vector_results: &[SearchResult],
    sparse_results: &[SparseResult],
    alpha: f32,
    top_k: usize,
    rrf_k: f32,
) -> Vec<RankedResult> {
    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, FusionEntry> = HashMap::new();

    for (rank, result) in vector_results.iter().enumerate() {
        let key = result_key(&result.text);
        let rrf = 1.0 / (rrf_k + rank as f32 + 1.0);
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            FusionEntry {
                text: result.text.clone(),
                vector_rrf: 0.0,
                sparse_rrf: 0.0,
                vector_score: result.score,
                sparse_score: 0.0,
                chunk_index: result.chunk_index,
                metadata: result.metadata.clone(),
            }
        });
        entry.vector_rrf = rrf;
        entry.vector_score = result.score;
    }

    for (rank, result) in sparse_results.iter().enumerate() {
        let key = result_key(&result.text);
        let rrf = 1.0 / (rrf_k + rank as f32 + 1.0);
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            FusionEntry {
                text: result.text.clone(),
                vector_rrf: 0.0,
                sparse_rrf: 0.0,
                vector_score: 0.0,
                sparse_score: result.score,
                chunk_index: result.chunk_index,
                metadata: result.metadata.clone(),
            }
        });
        entry.sparse_rrf = rrf;
        entry.sparse_score = result.score;
    }

    let mut ranked: Vec<RankedResult> = order
        .into_iter()
        .filter_map(|key| entries.remove(&key))
        .map(|entry| RankedResult {
            text: entry.text,
            score: alpha * entry.vector_rrf + (1.0 - alpha) * entry.sparse_rrf,
            vector_score: entry.vector_score,
            sparse_score: entry.sparse_score,
            chunk_index: entry.chunk_index,
            metadata: entry.metadata,
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(text: &str, score: f32) -> SearchResult {
        SearchResult {
            text: text.to_string(),
            score,
            chunk_index: 0,
            metadata: Metadata::new(),
        }
    }

    fn sparse(text: &str, score: f32) -> SparseResult {
        SparseResult {
            text: text.to_string(),
            score,
            chunk_index: 0,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn fusion_combines_both_sides() {
        let vector = vec![dense("doc1", 0.95), dense("doc2", 0.85), dense("doc3", 0.75)];
        let lexical = vec![sparse("doc2", 5.0), sparse("doc1", 4.0), sparse("doc4", 3.0)];

        let fused = reciprocal_rank_fusion(&vector, &lexical, 0.5, 5, 60.0);

        assert_eq!(fused.len(), 4);
        let keys: Vec<&str> = fused.iter().map(|r| r.text.as_str()).collect();
        for doc in ["doc1", "doc2", "doc3", "doc4"] {
            assert!(keys.contains(&doc), "missing {}", doc);
        }

        // doc1 and doc2 tie: each has one rank-0 and one rank-1 placement.
        let top = &fused[0];
        assert!(top.text == "doc1" || top.text == "doc2");
        let doc1 = fused.iter().find(|r| r.text == "doc1").unwrap();
        let expected = 0.5 * (1.0 / 61.0) + 0.5 * (1.0 / 62.0);
        assert!((doc1.score - expected).abs() < 1e-6);
    }

    #[test]
    fn duplicate_text_merges_with_both_scores() {
        let vector = vec![dense("shared text", 0.9)];
        let lexical = vec![sparse("shared text", 3.0)];

        let fused = reciprocal_rank_fusion(&vector, &lexical, 0.5, 5, 60.0);

        assert_eq!(fused.len(), 1);
        assert!(fused[0].vector_score > 0.0);
        assert!(fused[0].sparse_score > 0.0);
    }

    #[test]
    fn alpha_one_ranks_vector_top_first() {
        let vector = vec![dense("vec-top", 0.9), dense("other", 0.8)];
        let lexical = vec![sparse("lex-top", 9.0), sparse("vec-top", 1.0)];

        let fused = reciprocal_rank_fusion(&vector, &lexical, 1.0, 5, 60.0);
        assert_eq!(fused[0].text, "vec-top");
    }

    #[test]
    fn alpha_zero_ranks_sparse_top_first() {
        let vector = vec![dense("vec-top", 0.9), dense("lex-top", 0.8)];
        let lexical = vec![sparse("lex-top", 9.0), sparse("vec-top", 1.0)];

        let fused = reciprocal_rank_fusion(&vector, &lexical, 0.0, 5, 60.0);
        assert_eq!(fused[0].text, "lex-top");
    }

    #[test]
    fn output_is_bounded_and_sorted() {
        let vector: Vec<SearchResult> = (0..10)
            .map(|i| dense(&format!("v{}", i), 1.0 - i as f32 * 0.05))
            .collect();
        let lexical: Vec<SparseResult> =
            (0..10).map(|i| sparse(&format!("s{}", i), 10.0 - i as f32)).collect();

        let fused = reciprocal_rank_fusion(&vector, &lexical, 0.7, 5, 60.0);

        assert_eq!(fused.len(), 5);
        for pair in fused.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn dedup_key_ignores_case_and_long_tails() {
        let long_a = format!("{}{}", "a".repeat(200), "tail-one");
        let long_b = format!("{}{}", "A".repeat(200), "tail-two");
        let vector = vec![dense(&long_a, 0.9)];
        let lexical = vec![sparse(&long_b, 4.0)];

        let fused = reciprocal_rank_fusion(&vector, &lexical, 0.5, 5, 60.0);
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn empty_inputs_fuse_to_empty() {
        let fused = reciprocal_rank_fusion(&[], &[], 0.5, 5, 60.0);
        assert!(fused.is_empty());
    }

    #[test]
    fn one_empty_side_passes_the_other_through() {
        let lexical = vec![sparse("only sparse", 2.0)];
        let fused = reciprocal_rank_fusion(&[], &lexical, 0.7, 5, 60.0);

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].vector_score, 0.0);
        let expected = 0.3 * (1.0 / 61.0);
        assert!((fused[0].score - expected).abs() < 1e-6);
    }
}
