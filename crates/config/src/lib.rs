//! Configuration for the RAG engine
//!
//! Settings are layered: `config/default.yaml` (optional) under
//! `RAG_`-prefixed environment variables, deserialized into [`Settings`]
//! with serde defaults for everything else.

mod settings;

pub use settings::{load_settings, ChunkingStrategy, EmbeddingModel, Settings};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
