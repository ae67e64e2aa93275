//! Semantic query cache
//!
//! Answers are cached in a dedicated vector collection keyed by the query
//! embedding; a new query hits when its cosine similarity to a stored
//! query clears the threshold, the entry belongs to the same collection,
//! and it has not outlived its TTL. The cache is a best-effort
//! accelerator: every failure is a warning and a miss, never a query
//! failure.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use rag_engine_config::Settings;
use rag_engine_core::{now_epoch_secs, Metadata};
use rag_engine_persistence::Store;
use rag_engine_retrieval::{hash_point_id, Embedder, VectorPoint, VectorStore};

/// Dedicated cache collection; its dimension equals the embedder's.
pub const CACHE_COLLECTION: &str = "_query_cache";

/// A cached pipeline result.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub answer: String,
    pub sources: serde_json::Value,
    pub eval_scores: Option<serde_json::Value>,
    pub model: String,
    pub created_at: f64,
    pub tokens_used: i64,
    pub latency_ms: f64,
}

/// Aggregated cache statistics for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsReport {
    pub cache_enabled: bool,
    pub cache_size: u64,
    pub total_lookups: i64,
    pub hits: i64,
    pub misses: i64,
    pub hit_rate_percent: f64,
    pub avg_saved_latency_ms: f64,
    pub threshold: f64,
    pub ttl_seconds: u64,
}

/// Vector-indexed query cache with TTL.
pub struct QueryCache {
    embedder: Arc<Embedder>,
    vector_store: Arc<VectorStore>,
    store: Store,
    enabled: bool,
    threshold: f64,
    ttl_seconds: u64,
}

impl QueryCache {
    pub fn new(
        embedder: Arc<Embedder>,
        vector_store: Arc<VectorStore>,
        store: Store,
        settings: &Settings,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            store,
            enabled: settings.cache_enabled,
            threshold: settings.cache_threshold,
            ttl_seconds: settings.cache_ttl_seconds,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Create the cache collection if missing. Load-bearing on first use;
    /// also called per store so the cache self-heals after a clear.
    pub async fn ensure_collection(&self) {
        if let Err(e) = self
            .vector_store
            .ensure_collection(CACHE_COLLECTION, self.embedder.dimension())
            .await
        {
            tracing::warn!(error = %e, "Failed to create cache collection");
        }
    }

    fn query_hash(collection: &str, query: &str) -> String {
        let canonical = format!("{}:{}", collection, query.trim().to_lowercase());
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }

    /// Look up a semantically similar cached answer.
    pub async fn lookup(&self, query: &str, collection: &str) -> Option<CachedResult> {
        if !self.enabled {
            return None;
        }

        match self.try_lookup(query, collection).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn try_lookup(
        &self,
        query: &str,
        collection: &str,
    ) -> Result<Option<CachedResult>, String> {
        let embedding = self.embedder.embed_one(query).await.map_err(|e| e.to_string())?;
        let hits = self
            .vector_store
            .search(CACHE_COLLECTION, &embedding, 1, None)
            .await
            .map_err(|e| e.to_string())?;

        let Some(top) = hits.into_iter().next() else {
            self.record_stat(query, collection, false, 0.0).await;
            return Ok(None);
        };

        if !accept_entry(
            top.score,
            &top.payload,
            collection,
            now_epoch_secs(),
            self.threshold,
            self.ttl_seconds,
        ) {
            self.record_stat(query, collection, false, 0.0).await;
            return Ok(None);
        }

        let payload = top.payload;
        let saved_latency = payload
            .get("latency_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        self.record_stat(query, collection, true, saved_latency).await;

        Ok(Some(CachedResult {
            answer: payload
                .get("answer")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            sources: payload
                .get("sources")
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_else(|| serde_json::json!([])),
            eval_scores: payload
                .get("eval_scores")
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
                .filter(|v| !v.is_null()),
            model: payload
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            created_at: payload
                .get("created_at")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            tokens_used: payload
                .get("tokens_used")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            latency_ms: saved_latency,
        }))
    }

    /// Store a pipeline result keyed by the query embedding.
    pub async fn store_result(&self, query: &str, collection: &str, result: CachedResult) {
        if !self.enabled {
            return;
        }

        if let Err(e) = self.try_store(query, collection, result).await {
            tracing::warn!(error = %e, "Cache store failed");
        }
    }

    async fn try_store(
        &self,
        query: &str,
        collection: &str,
        result: CachedResult,
    ) -> Result<(), String> {
        let embedding = self.embedder.embed_one(query).await.map_err(|e| e.to_string())?;
        self.ensure_collection().await;

        let point_id = hash_point_id(&Self::query_hash(collection, query));

        let mut payload = Metadata::new();
        payload.insert("query".to_string(), serde_json::json!(query));
        payload.insert("collection".to_string(), serde_json::json!(collection));
        payload.insert("answer".to_string(), serde_json::json!(result.answer));
        payload.insert(
            "sources".to_string(),
            serde_json::json!(result.sources.to_string()),
        );
        payload.insert(
            "eval_scores".to_string(),
            serde_json::json!(
                result
                    .eval_scores
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".to_string())
            ),
        );
        payload.insert("model".to_string(), serde_json::json!(result.model));
        payload.insert(
            "created_at".to_string(),
            serde_json::json!(result.created_at),
        );
        payload.insert(
            "tokens_used".to_string(),
            serde_json::json!(result.tokens_used),
        );
        payload.insert(
            "latency_ms".to_string(),
            serde_json::json!(result.latency_ms),
        );

        self.vector_store
            .upsert(
                CACHE_COLLECTION,
                vec![VectorPoint {
                    id: point_id,
                    vector: embedding,
                    payload,
                }],
            )
            .await
            .map_err(|e| e.to_string())
    }

    /// Drop the cache collection; returns how many entries it held.
    pub async fn clear(&self) -> u64 {
        let count = self.vector_store.points_count(CACHE_COLLECTION).await;
        match self.vector_store.delete_collection(CACHE_COLLECTION).await {
            Ok(_) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Cache clear failed");
                0
            }
        }
    }

    /// Stats endpoint payload.
    pub async fn stats(&self) -> CacheStatsReport {
        let summary = self.store.cache_stat_summary().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read cache stats");
            Default::default()
        });
        let cache_size = self.vector_store.points_count(CACHE_COLLECTION).await;

        let total = summary.hits + summary.misses;
        let hit_rate = if total > 0 {
            summary.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        CacheStatsReport {
            cache_enabled: self.enabled,
            cache_size,
            total_lookups: total,
            hits: summary.hits,
            misses: summary.misses,
            hit_rate_percent: (hit_rate * 10.0).round() / 10.0,
            avg_saved_latency_ms: (summary.avg_saved_latency_ms * 10.0).round() / 10.0,
            threshold: self.threshold,
            ttl_seconds: self.ttl_seconds,
        }
    }

    async fn record_stat(&self, query: &str, collection: &str, hit: bool, saved_latency_ms: f64) {
        let hash = Self::query_hash(collection, query);
        if let Err(e) = self.store.insert_cache_stat(&hash, hit, saved_latency_ms).await {
            tracing::warn!(error = %e, "Failed to record cache stat");
        }
    }
}

/// Cache acceptance predicate: similarity over threshold, same collection,
/// within TTL.
fn accept_entry(
    score: f32,
    payload: &Metadata,
    collection: &str,
    now: f64,
    threshold: f64,
    ttl_seconds: u64,
) -> bool {
    if (score as f64) < threshold {
        return false;
    }

    let entry_collection = payload.get("collection").and_then(|v| v.as_str());
    if entry_collection != Some(collection) {
        return false;
    }

    let created_at = payload
        .get("created_at")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    now - created_at <= ttl_seconds as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(collection: &str, created_at: f64) -> Metadata {
        let mut p = Metadata::new();
        p.insert("collection".to_string(), serde_json::json!(collection));
        p.insert("created_at".to_string(), serde_json::json!(created_at));
        p
    }

    #[test]
    fn fresh_similar_entry_is_accepted() {
        let now = 1_000_000.0;
        let p = payload("docs", now - 10.0);
        assert!(accept_entry(0.97, &p, "docs", now, 0.95, 3600));
    }

    #[test]
    fn low_similarity_is_rejected() {
        let now = 1_000_000.0;
        let p = payload("docs", now - 10.0);
        assert!(!accept_entry(0.90, &p, "docs", now, 0.95, 3600));
    }

    #[test]
    fn cross_collection_hits_are_rejected() {
        let now = 1_000_000.0;
        let p = payload("other", now - 10.0);
        assert!(!accept_entry(0.99, &p, "docs", now, 0.95, 3600));
    }

    #[test]
    fn ttl_boundary_expires_entries() {
        let now = 1_000_000.0;
        let ttl = 3600u64;

        // One second past the TTL must miss even at perfect similarity.
        let expired = payload("docs", now - (ttl as f64 + 1.0));
        assert!(!accept_entry(1.0, &expired, "docs", now, 0.95, ttl));

        // Exactly at the TTL still hits.
        let at_boundary = payload("docs", now - ttl as f64);
        assert!(accept_entry(1.0, &at_boundary, "docs", now, 0.95, ttl));
    }

    #[test]
    fn missing_payload_fields_are_rejected() {
        let now = 1_000_000.0;
        let empty = Metadata::new();
        assert!(!accept_entry(0.99, &empty, "docs", now, 0.95, 3600));
    }

    #[test]
    fn query_hash_normalizes_and_scopes_by_collection() {
        let a = QueryCache::query_hash("docs", "  What is Rust?  ");
        let b = QueryCache::query_hash("docs", "what is rust?");
        let c = QueryCache::query_hash("other", "what is rust?");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
