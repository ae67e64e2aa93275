//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Embedding model selection.
///
/// The variant fixes the vector dimension for every collection created
/// with it; mixing dimensions in one collection is a fatal error at the
/// vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmbeddingModel {
    #[default]
    #[serde(rename = "all-MiniLM-L6-v2")]
    MiniLmL6,
    #[serde(rename = "BAAI/bge-base-en-v1.5")]
    BgeBase,
    #[serde(rename = "text-embedding-3-small")]
    TextEmbedding3Small,
}

impl EmbeddingModel {
    /// Vector dimension produced by this model.
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingModel::MiniLmL6 => 384,
            EmbeddingModel::BgeBase => 768,
            EmbeddingModel::TextEmbedding3Small => 1536,
        }
    }

    /// Model identifier as sent to the embedding provider.
    pub fn model_id(&self) -> &'static str {
        match self {
            EmbeddingModel::MiniLmL6 => "all-MiniLM-L6-v2",
            EmbeddingModel::BgeBase => "BAAI/bge-base-en-v1.5",
            EmbeddingModel::TextEmbedding3Small => "text-embedding-3-small",
        }
    }
}

/// Chunking strategy for ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    Fixed,
    #[default]
    Recursive,
    Semantic,
}

/// Application settings (environment prefix `RAG_`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // Qdrant
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub default_collection: String,

    // Embedding
    #[serde(default)]
    pub embedding_model: EmbeddingModel,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    // Chunking
    #[serde(default)]
    pub chunking_strategy: ChunkingStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    // LLM
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    // Retrieval
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default)]
    pub use_reranker: bool,

    // Cache
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_threshold")]
    pub cache_threshold: f64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    // Eval
    #[serde(default = "default_true")]
    pub eval_on_query: bool,
    #[serde(default = "default_true")]
    pub eval_lightweight: bool,

    // Storage
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_sparse_index_dir")]
    pub sparse_index_dir: String,

    // Upload
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_files_per_upload")]
    pub max_files_per_upload: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection() -> String {
    "documents".to_string()
}

fn default_embedding_batch_size() -> usize {
    64
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5-coder:14b".to_string()
}

fn default_max_context_tokens() -> usize {
    4096
}

fn default_top_k() -> usize {
    5
}

fn default_hybrid_alpha() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_cache_threshold() -> f64 {
    0.95
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_db_path() -> String {
    "data/rag_engine.db".to_string()
}

fn default_sparse_index_dir() -> String {
    "data/bm25_indices".to_string()
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_max_files_per_upload() -> usize {
    20
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            qdrant_url: default_qdrant_url(),
            qdrant_api_key: None,
            default_collection: default_collection(),
            embedding_model: EmbeddingModel::default(),
            embedding_batch_size: default_embedding_batch_size(),
            chunking_strategy: ChunkingStrategy::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            ollama_url: default_ollama_url(),
            default_model: default_model(),
            openai_api_key: None,
            anthropic_api_key: None,
            max_context_tokens: default_max_context_tokens(),
            default_top_k: default_top_k(),
            hybrid_alpha: default_hybrid_alpha(),
            use_reranker: false,
            cache_enabled: true,
            cache_threshold: default_cache_threshold(),
            cache_ttl_seconds: default_cache_ttl(),
            eval_on_query: true,
            eval_lightweight: true,
            db_path: default_db_path(),
            sparse_index_dir: default_sparse_index_dir(),
            upload_dir: default_upload_dir(),
            max_file_size_mb: default_max_file_size_mb(),
            max_files_per_upload: default_max_files_per_upload(),
        }
    }
}

/// Load settings from `config/default.yaml` (if present) and the
/// `RAG_`-prefixed environment.
///
/// Priority: env vars > config file > built-in defaults.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let settings = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::with_prefix("RAG").try_parsing(true))
        .build()?
        .try_deserialize::<Settings>()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let s = Settings::default();
        assert_eq!(s.default_top_k, 5);
        assert_eq!(s.hybrid_alpha, 0.7);
        assert_eq!(s.cache_threshold, 0.95);
        assert_eq!(s.cache_ttl_seconds, 3600);
        assert_eq!(s.chunk_size, 512);
        assert_eq!(s.chunk_overlap, 50);
        assert_eq!(s.embedding_model, EmbeddingModel::MiniLmL6);
        assert_eq!(s.chunking_strategy, ChunkingStrategy::Recursive);
        assert!(s.cache_enabled);
        assert!(s.eval_on_query);
        assert!(s.eval_lightweight);
        assert!(!s.use_reranker);
    }

    #[test]
    fn embedding_model_dimensions() {
        assert_eq!(EmbeddingModel::MiniLmL6.dimension(), 384);
        assert_eq!(EmbeddingModel::BgeBase.dimension(), 768);
        assert_eq!(EmbeddingModel::TextEmbedding3Small.dimension(), 1536);
    }

    #[test]
    fn embedding_model_serde_names() {
        let m: EmbeddingModel = serde_json::from_str("\"text-embedding-3-small\"").unwrap();
        assert_eq!(m, EmbeddingModel::TextEmbedding3Small);
        assert_eq!(
            serde_json::to_string(&EmbeddingModel::BgeBase).unwrap(),
            "\"BAAI/bge-base-en-v1.5\""
        );
    }

    #[test]
    fn chunking_strategy_is_lowercase() {
        let s: ChunkingStrategy = serde_json::from_str("\"semantic\"").unwrap();
        assert_eq!(s, ChunkingStrategy::Semantic);
    }
}
