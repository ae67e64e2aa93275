//! Sparse BM25 search
//!
//! Per-collection Okapi BM25 over tokenized chunk texts. Each index is an
//! ordered list of `(text, metadata)` rows persisted as one JSON file under
//! the sparse index directory; the model is rebuilt on every append. A
//! process-wide registry caches loaded indices behind per-collection locks:
//! readers run concurrently, appends and deletes take the write side.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use rag_engine_core::Metadata;

use crate::RetrievalError;

const K1: f32 = 1.5;
const B: f32 = 0.75;
const EPSILON: f32 = 0.25;

/// Sparse search hit.
#[derive(Debug, Clone)]
pub struct SparseResult {
    pub text: String,
    pub score: f32,
    pub chunk_index: usize,
    pub metadata: Metadata,
}

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("static pattern"));

/// Tokenize for indexing and querying: lowercase, strip punctuation to
/// spaces, split on whitespace, drop single-character tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowered, " ");
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// Okapi BM25 model over a tokenized corpus.
///
/// Negative idf values (terms in more than half the corpus) are floored to
/// `EPSILON * average_idf`, matching the Okapi variant the engine was tuned
/// against.
#[derive(Debug)]
struct Bm25Model {
    term_freqs: Vec<HashMap<String, f32>>,
    idf: HashMap<String, f32>,
    doc_len: Vec<f32>,
    avgdl: f32,
}

impl Bm25Model {
    fn fit(corpus: &[Vec<String>]) -> Self {
        let n = corpus.len() as f32;
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_len = Vec::with_capacity(corpus.len());
        let mut doc_freq: HashMap<String, f32> = HashMap::new();

        for tokens in corpus {
            doc_len.push(tokens.len() as f32);
            let mut freqs: HashMap<String, f32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0.0) += 1.0;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0.0) += 1.0;
            }
            term_freqs.push(freqs);
        }

        let avgdl = if doc_len.is_empty() {
            0.0
        } else {
            doc_len.iter().sum::<f32>() / doc_len.len() as f32
        };

        let mut idf: HashMap<String, f32> = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative: Vec<String> = Vec::new();
        for (term, df) in &doc_freq {
            let value = ((n - df + 0.5) / (df + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }
        if !idf.is_empty() {
            let floor = EPSILON * (idf_sum / idf.len() as f32);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            term_freqs,
            idf,
            doc_len,
            avgdl,
        }
    }

    fn scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0; self.term_freqs.len()];
        if self.avgdl == 0.0 {
            return scores;
        }
        for token in query_tokens {
            let Some(&idf) = self.idf.get(token) else {
                continue;
            };
            for (i, freqs) in self.term_freqs.iter().enumerate() {
                let Some(&tf) = freqs.get(token) else {
                    continue;
                };
                let norm = K1 * (1.0 - B + B * self.doc_len[i] / self.avgdl);
                scores[i] += idf * tf * (K1 + 1.0) / (tf + norm);
            }
        }
        scores
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    collection: String,
    documents: Vec<String>,
    metadata: Vec<Metadata>,
}

/// One collection's sparse index.
#[derive(Debug)]
pub struct Bm25Index {
    collection: String,
    documents: Vec<String>,
    metadata: Vec<Metadata>,
    model: Option<Bm25Model>,
}

impl Bm25Index {
    pub fn empty(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            documents: Vec::new(),
            metadata: Vec::new(),
            model: None,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn build(&mut self) {
        if self.documents.is_empty() {
            self.model = None;
            return;
        }
        let corpus: Vec<Vec<String>> = self.documents.iter().map(|d| tokenize(d)).collect();
        self.model = Some(Bm25Model::fit(&corpus));
    }

    /// Append rows and rebuild the model.
    pub fn add_documents(&mut self, texts: Vec<String>, metadata: Vec<Metadata>) {
        self.documents.extend(texts);
        self.metadata.extend(metadata);
        self.build();
    }

    /// Top-k by BM25 score; non-positive scores are dropped.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SparseResult> {
        let Some(model) = &self.model else {
            return Vec::new();
        };

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let scores = model.scores(&query_tokens);
        let mut scored: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .filter(|(_, score)| *score > 0.0)
            .map(|(idx, score)| {
                let metadata = self.metadata.get(idx).cloned().unwrap_or_default();
                let chunk_index = metadata
                    .get("chunk_index")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .unwrap_or(idx);
                SparseResult {
                    text: self.documents[idx].clone(),
                    score,
                    chunk_index,
                    metadata,
                }
            })
            .collect()
    }

    fn index_path(dir: &Path, collection: &str) -> PathBuf {
        dir.join(format!("{}.json", collection))
    }

    fn save(&self, dir: &Path) -> Result<(), RetrievalError> {
        fs::create_dir_all(dir)
            .map_err(|e| RetrievalError::Index(format!("Create index dir: {}", e)))?;
        let file = IndexFile {
            collection: self.collection.clone(),
            documents: self.documents.clone(),
            metadata: self.metadata.clone(),
        };
        let data = serde_json::to_string(&file)
            .map_err(|e| RetrievalError::Index(format!("Serialize index: {}", e)))?;
        let path = Self::index_path(dir, &self.collection);
        fs::write(&path, data)
            .map_err(|e| RetrievalError::Index(format!("Write {}: {}", path.display(), e)))?;
        tracing::info!(
            collection = %self.collection,
            documents = self.documents.len(),
            "Saved BM25 index"
        );
        Ok(())
    }

    fn load(dir: &Path, collection: &str) -> Option<Self> {
        let path = Self::index_path(dir, collection);
        let data = fs::read_to_string(path).ok()?;
        let file: IndexFile = serde_json::from_str(&data).ok()?;
        let mut index = Self {
            collection: file.collection,
            documents: file.documents,
            metadata: file.metadata,
            model: None,
        };
        index.build();
        Some(index)
    }
}

/// Process-wide cache of loaded sparse indices.
pub struct SparseRegistry {
    dir: PathBuf,
    indices: RwLock<HashMap<String, Arc<RwLock<Bm25Index>>>>,
}

impl SparseRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            indices: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_load(&self, collection: &str) -> Arc<RwLock<Bm25Index>> {
        if let Some(index) = self.indices.read().get(collection) {
            return Arc::clone(index);
        }

        let mut indices = self.indices.write();
        // Another writer may have loaded it while we waited for the lock.
        if let Some(index) = indices.get(collection) {
            return Arc::clone(index);
        }

        let index = Bm25Index::load(&self.dir, collection)
            .unwrap_or_else(|| Bm25Index::empty(collection));
        let index = Arc::new(RwLock::new(index));
        indices.insert(collection.to_string(), Arc::clone(&index));
        index
    }

    /// Append rows to a collection's index, rebuild and persist it.
    pub fn append(
        &self,
        collection: &str,
        texts: Vec<String>,
        metadata: Vec<Metadata>,
    ) -> Result<(), RetrievalError> {
        let index = self.get_or_load(collection);
        let mut guard = index.write();
        guard.add_documents(texts, metadata);
        guard.save(&self.dir)
    }

    /// BM25 search; an empty or missing collection returns no results.
    pub fn search(&self, collection: &str, query: &str, top_k: usize) -> Vec<SparseResult> {
        let index = self.get_or_load(collection);
        let guard = index.read();
        guard.search(query, top_k)
    }

    pub fn doc_count(&self, collection: &str) -> usize {
        self.get_or_load(collection).read().len()
    }

    /// Drop the on-disk index and evict the cache entry.
    pub fn remove(&self, collection: &str) -> Result<(), RetrievalError> {
        let path = Bm25Index::index_path(&self.dir, collection);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| RetrievalError::Index(format!("Remove {}: {}", path.display(), e)))?;
        }
        self.indices.write().remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(chunk_index: usize) -> Metadata {
        let mut m = Metadata::new();
        m.insert("chunk_index".to_string(), serde_json::json!(chunk_index));
        m
    }

    #[test]
    fn tokenize_drops_punctuation_and_short_tokens() {
        assert_eq!(
            tokenize("Hello, World! I am a big fan"),
            vec!["hello", "world", "am", "big", "fan"]
        );
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = Bm25Index::empty("docs");
        assert!(index.search("anything", 5).is_empty());
    }

    #[test]
    fn indexed_text_is_found_with_positive_score() {
        let mut index = Bm25Index::empty("docs");
        index.add_documents(
            vec![
                "gold loan interest rates are fixed annually".to_string(),
                "apply online for a savings account".to_string(),
            ],
            vec![meta(0), meta(1)],
        );

        let results = index.search("interest rates", 5);
        assert!(!results.is_empty());
        assert!(results[0].score > 0.0);
        assert!(results[0].text.contains("interest"));
        assert_eq!(results[0].chunk_index, 0);
    }

    #[test]
    fn unrelated_query_is_dropped() {
        let mut index = Bm25Index::empty("docs");
        index.add_documents(
            vec!["gold loan interest rates".to_string()],
            vec![meta(0)],
        );
        assert!(index.search("zebra photosynthesis", 5).is_empty());
    }

    #[test]
    fn scores_are_non_increasing() {
        let mut index = Bm25Index::empty("docs");
        index.add_documents(
            vec![
                "rust ownership and borrowing".to_string(),
                "rust lifetimes".to_string(),
                "python garbage collection".to_string(),
            ],
            vec![meta(0), meta(1), meta(2)],
        );

        let results = index.search("rust ownership", 10);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn registry_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SparseRegistry::new(dir.path());
        registry
            .append(
                "kb",
                vec!["the capital of france is paris".to_string()],
                vec![meta(0)],
            )
            .unwrap();

        // Fresh registry must load the persisted file.
        let fresh = SparseRegistry::new(dir.path());
        let results = fresh.search("kb", "capital france", 3);
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.0);

        fresh.remove("kb").unwrap();
        assert!(fresh.search("kb", "capital france", 3).is_empty());
        assert!(!dir.path().join("kb.json").exists());
    }
}
