//! Cache hit/miss statistics

use rusqlite::params;
use serde::Serialize;

use rag_engine_core::now_epoch_secs;

use crate::{Store, StoreError};

/// Aggregate over recorded lookups.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStatSummary {
    pub hits: i64,
    pub misses: i64,
    pub avg_saved_latency_ms: f64,
}

impl Store {
    /// Record one lookup outcome.
    pub async fn insert_cache_stat(
        &self,
        query_hash: &str,
        hit: bool,
        saved_latency_ms: f64,
    ) -> Result<(), StoreError> {
        let query_hash = query_hash.to_string();
        self.with_conn(move |conn| {
            let now = now_epoch_secs();
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO cache_stats (id, query_hash, hit_or_miss, saved_latency_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    query_hash,
                    if hit { "hit" } else { "miss" },
                    saved_latency_ms,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn cache_stat_summary(&self) -> Result<CacheStatSummary, StoreError> {
        self.with_conn(|conn| {
            let hits: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_stats WHERE hit_or_miss = 'hit'",
                [],
                |row| row.get(0),
            )?;
            let misses: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_stats WHERE hit_or_miss = 'miss'",
                [],
                |row| row.get(0),
            )?;
            let avg_saved: Option<f64> = conn.query_row(
                "SELECT AVG(saved_latency_ms) FROM cache_stats WHERE hit_or_miss = 'hit'",
                [],
                |row| row.get(0),
            )?;
            Ok(CacheStatSummary {
                hits,
                misses,
                avg_saved_latency_ms: avg_saved.unwrap_or(0.0),
            })
        })
        .await
    }

    /// Number of stat rows sharing a query hash (used in tests and
    /// diagnostics).
    pub async fn cache_stat_count(&self, query_hash: &str) -> Result<i64, StoreError> {
        let query_hash = query_hash.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_stats WHERE query_hash = ?1",
                [query_hash],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn summary_aggregates_hits_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        let hash = "a".repeat(64);
        store.insert_cache_stat(&hash, false, 0.0).await.unwrap();
        store.insert_cache_stat(&hash, true, 100.0).await.unwrap();
        store.insert_cache_stat(&hash, true, 300.0).await.unwrap();

        let summary = store.cache_stat_summary().await.unwrap();
        assert_eq!(summary.hits, 2);
        assert_eq!(summary.misses, 1);
        assert!((summary.avg_saved_latency_ms - 200.0).abs() < 1e-9);

        assert_eq!(store.cache_stat_count(&hash).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_summary_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        let summary = store.cache_stat_summary().await.unwrap();
        assert_eq!(summary.hits, 0);
        assert_eq!(summary.misses, 0);
        assert_eq!(summary.avg_saved_latency_ms, 0.0);
    }
}
