//! Retrieval parameter auto-tuning
//!
//! Mines the joined query log for the alpha and top-k values that
//! historically produced the best average quality, defined as the mean of
//! faithfulness and relevance. Observed alphas snap to 0.1-wide buckets;
//! a bucket needs three samples before it counts, and ten eligible rows
//! are required overall. Insufficient data yields `(None, None)`.

use serde::Serialize;

use rag_engine_persistence::{Store, TuningRow};

pub const MIN_QUERIES_FOR_TUNING: usize = 10;
const MIN_BUCKET_SAMPLES: usize = 3;
const HISTORY_LIMIT: usize = 500;

/// Detailed analysis for the optimal-params endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ParamAnalysis {
    pub sufficient_data: bool,
    pub total_queries: usize,
    pub min_required: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimal_alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimal_top_k: Option<i64>,
}

/// Insertion-ordered bucket accumulator; first-seen wins ties.
struct Buckets<K: PartialEq + Copy> {
    entries: Vec<(K, Vec<f64>)>,
}

impl<K: PartialEq + Copy> Buckets<K> {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(&mut self, key: K, quality: f64) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, scores)) => scores.push(quality),
            None => self.entries.push((key, vec![quality])),
        }
    }

    fn best(&self) -> Option<K> {
        let mut best: Option<(K, f64)> = None;
        for (key, scores) in &self.entries {
            if scores.len() < MIN_BUCKET_SAMPLES {
                continue;
            }
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            match best {
                Some((_, best_mean)) if mean <= best_mean => {}
                _ => best = Some((*key, mean)),
            }
        }
        best.map(|(key, _)| key)
    }
}

/// Pure selection over eligible rows.
pub fn select_optimal_params(rows: &[TuningRow]) -> (Option<f64>, Option<i64>) {
    if rows.len() < MIN_QUERIES_FOR_TUNING {
        return (None, None);
    }

    let mut alpha_buckets: Buckets<i64> = Buckets::new();
    let mut top_k_buckets: Buckets<i64> = Buckets::new();

    for row in rows {
        let quality = (row.faithfulness + row.relevance) / 2.0;
        let alpha_bin = (row.alpha * 10.0).round() as i64;
        alpha_buckets.push(alpha_bin, quality);
        if let Some(top_k) = row.top_k {
            top_k_buckets.push(top_k, quality);
        }
    }

    (
        alpha_buckets.best().map(|bin| bin as f64 / 10.0),
        top_k_buckets.best(),
    )
}

/// `(alpha, top_k)` for a collection, or `(None, None)` on thin history.
/// Failures degrade silently; tuning never breaks a query.
pub async fn optimal_params(store: &Store, collection: &str) -> (Option<f64>, Option<i64>) {
    match store.tuning_rows(collection, HISTORY_LIMIT).await {
        Ok(rows) => select_optimal_params(&rows),
        Err(e) => {
            tracing::warn!(collection, error = %e, "Auto-tune failed");
            (None, None)
        }
    }
}

/// Analysis variant used by the HTTP surface.
pub async fn param_analysis(store: &Store, collection: &str) -> ParamAnalysis {
    let rows = match store.tuning_rows(collection, HISTORY_LIMIT).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(collection, error = %e, "Param analysis failed");
            return ParamAnalysis {
                sufficient_data: false,
                total_queries: 0,
                min_required: MIN_QUERIES_FOR_TUNING,
                optimal_alpha: None,
                optimal_top_k: None,
            };
        }
    };

    if rows.len() < MIN_QUERIES_FOR_TUNING {
        return ParamAnalysis {
            sufficient_data: false,
            total_queries: rows.len(),
            min_required: MIN_QUERIES_FOR_TUNING,
            optimal_alpha: None,
            optimal_top_k: None,
        };
    }

    let (optimal_alpha, optimal_top_k) = select_optimal_params(&rows);
    ParamAnalysis {
        sufficient_data: true,
        total_queries: rows.len(),
        min_required: MIN_QUERIES_FOR_TUNING,
        optimal_alpha,
        optimal_top_k,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(alpha: f64, top_k: i64, quality: f64) -> TuningRow {
        TuningRow {
            alpha,
            top_k: Some(top_k),
            faithfulness: quality,
            relevance: quality,
        }
    }

    #[test]
    fn nine_rows_are_insufficient() {
        let rows: Vec<TuningRow> = (0..9).map(|_| row(0.7, 5, 0.8)).collect();
        assert_eq!(select_optimal_params(&rows), (None, None));
    }

    #[test]
    fn higher_mean_bucket_wins() {
        let mut rows = Vec::new();
        for _ in 0..3 {
            rows.push(row(0.8, 5, 0.8));
        }
        for _ in 0..3 {
            rows.push(row(0.3, 10, 0.6));
        }
        for _ in 0..4 {
            rows.push(row(0.5, 3, 0.7));
        }
        assert_eq!(rows.len(), 10);

        let (alpha, top_k) = select_optimal_params(&rows);
        assert_eq!(alpha, Some(0.8));
        assert_eq!(top_k, Some(5));
    }

    #[test]
    fn sparse_buckets_are_ignored() {
        // Ten rows but no bucket reaches three samples.
        let rows: Vec<TuningRow> = (0..10)
            .map(|i| row(i as f64 / 10.0, i as i64 + 1, 0.9))
            .collect();
        assert_eq!(select_optimal_params(&rows), (None, None));
    }

    #[test]
    fn alphas_snap_to_nearest_tenth() {
        let mut rows = Vec::new();
        for alpha in [0.68, 0.71, 0.73] {
            rows.push(row(alpha, 5, 0.9));
        }
        for _ in 0..7 {
            rows.push(row(0.2, 5, 0.1));
        }

        let (alpha, _) = select_optimal_params(&rows);
        assert_eq!(alpha, Some(0.7));
    }

    #[test]
    fn ties_keep_first_seen_bucket() {
        let mut rows = Vec::new();
        for _ in 0..3 {
            rows.push(row(0.4, 4, 0.8));
        }
        for _ in 0..3 {
            rows.push(row(0.9, 9, 0.8));
        }
        for _ in 0..4 {
            rows.push(row(0.1, 1, 0.0));
        }

        let (alpha, top_k) = select_optimal_params(&rows);
        assert_eq!(alpha, Some(0.4));
        assert_eq!(top_k, Some(4));
    }

    #[tokio::test]
    async fn analysis_reports_insufficient_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        let analysis = param_analysis(&store, "kb").await;
        assert!(!analysis.sufficient_data);
        assert_eq!(analysis.total_queries, 0);
        assert_eq!(analysis.min_required, MIN_QUERIES_FOR_TUNING);

        assert_eq!(optimal_params(&store, "kb").await, (None, None));
    }
}
