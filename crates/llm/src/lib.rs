//! LLM integration
//!
//! Routes generation requests by model-name prefix to Anthropic, OpenAI or
//! a local Ollama endpoint. Both unary and streaming modes are supported;
//! token usage comes from provider responses where available and the local
//! tokenizer otherwise, and every unary response carries its USD cost.

pub mod anthropic;
pub mod cost;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod router;

pub use cost::calculate_cost;
pub use prompt::{build_prompt, format_messages, Message, Role, SourceInfo, SYSTEM_PROMPT};
pub use router::{LlmResponse, LlmRouter, LlmStream, ModelInfo};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}
