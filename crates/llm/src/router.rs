//! Model routing
//!
//! Dispatches by model-name prefix: `claude*` to Anthropic, `gpt*`/`o1*`/
//! `o3*` to OpenAI, everything else to the local Ollama endpoint. Cloud
//! providers require their API key; the local provider never does.

use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::Stream;
use reqwest::Client;

use rag_engine_config::Settings;
use rag_engine_core::count_tokens;

use crate::anthropic::AnthropicBackend;
use crate::cost::calculate_cost;
use crate::ollama::{LocalModel, OllamaBackend};
use crate::openai::OpenAiBackend;
use crate::prompt::Message;
use crate::LlmError;

/// Lazy sequence of generated text fragments.
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

pub use crate::ollama::LocalModel as ModelInfo;

/// Unary generation result.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: usize,
    pub latency_ms: f64,
    pub cost_usd: f64,
}

/// Raw backend output before accounting.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub content: String,
    pub input_tokens: Option<usize>,
    pub output_tokens: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Anthropic,
    OpenAi,
    Ollama,
}

fn provider_for(model: &str) -> Provider {
    if model.starts_with("claude") {
        Provider::Anthropic
    } else if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3") {
        Provider::OpenAi
    } else {
        Provider::Ollama
    }
}

/// Prefix-routing LLM client.
pub struct LlmRouter {
    ollama: OllamaBackend,
    openai: Option<OpenAiBackend>,
    anthropic: Option<AnthropicBackend>,
    default_model: String,
}

impl LlmRouter {
    pub fn new(settings: &Settings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            ollama: OllamaBackend::new(client.clone(), settings.ollama_url.clone()),
            openai: settings
                .openai_api_key
                .as_ref()
                .map(|key| OpenAiBackend::new(client.clone(), key.clone())),
            anthropic: settings
                .anthropic_api_key
                .as_ref()
                .map(|key| AnthropicBackend::new(client, key.clone())),
            default_model: settings.default_model.clone(),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn resolve<'a>(&'a self, model: Option<&'a str>) -> &'a str {
        model.unwrap_or(self.default_model.as_str())
    }

    /// Unary generation with latency, token and cost accounting.
    pub async fn generate(
        &self,
        messages: &[Message],
        model: Option<&str>,
    ) -> Result<LlmResponse, LlmError> {
        let model = self.resolve(model);
        let start = Instant::now();

        let response = match provider_for(model) {
            Provider::Anthropic => {
                let backend = self.anthropic.as_ref().ok_or_else(|| {
                    LlmError::Configuration(
                        "Anthropic models require RAG_ANTHROPIC_API_KEY".to_string(),
                    )
                })?;
                backend.generate(messages, model).await?
            }
            Provider::OpenAi => {
                let backend = self.openai.as_ref().ok_or_else(|| {
                    LlmError::Configuration("OpenAI models require RAG_OPENAI_API_KEY".to_string())
                })?;
                backend.generate(messages, model).await?
            }
            Provider::Ollama => self.ollama.generate(messages, model).await?,
        };

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let input_tokens = response.input_tokens.unwrap_or_else(|| {
            messages.iter().map(|m| count_tokens(&m.content)).sum()
        });
        let output_tokens = response
            .output_tokens
            .unwrap_or_else(|| count_tokens(&response.content));

        Ok(LlmResponse {
            content: response.content,
            model: model.to_string(),
            tokens_used: input_tokens + output_tokens,
            latency_ms,
            cost_usd: calculate_cost(model, input_tokens, output_tokens),
        })
    }

    /// Streamed generation; the stream is lazy and stops reading from the
    /// provider when dropped.
    pub fn generate_stream(
        &self,
        messages: &[Message],
        model: Option<&str>,
    ) -> Result<LlmStream, LlmError> {
        let model = self.resolve(model);

        match provider_for(model) {
            Provider::Anthropic => {
                let backend = self.anthropic.as_ref().ok_or_else(|| {
                    LlmError::Configuration(
                        "Anthropic models require RAG_ANTHROPIC_API_KEY".to_string(),
                    )
                })?;
                Ok(backend.generate_stream(messages, model))
            }
            Provider::OpenAi => {
                let backend = self.openai.as_ref().ok_or_else(|| {
                    LlmError::Configuration("OpenAI models require RAG_OPENAI_API_KEY".to_string())
                })?;
                Ok(backend.generate_stream(messages, model))
            }
            Provider::Ollama => Ok(self.ollama.generate_stream(messages, model)),
        }
    }

    /// Health of the local provider (5 s probe).
    pub async fn local_health(&self) -> bool {
        self.ollama.health().await
    }

    /// Models available on the local provider.
    pub async fn local_models(&self) -> Vec<LocalModel> {
        self.ollama.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_route_to_expected_providers() {
        assert_eq!(provider_for("claude-3-5-haiku-latest"), Provider::Anthropic);
        assert_eq!(provider_for("gpt-4o-mini"), Provider::OpenAi);
        assert_eq!(provider_for("o1-preview"), Provider::OpenAi);
        assert_eq!(provider_for("o3-mini"), Provider::OpenAi);
        assert_eq!(provider_for("qwen2.5-coder:14b"), Provider::Ollama);
        assert_eq!(provider_for("llama3.1:8b"), Provider::Ollama);
    }

    #[tokio::test]
    async fn cloud_models_require_keys() {
        let settings = Settings::default();
        let router = LlmRouter::new(&settings).unwrap();
        let messages = vec![Message::user("hi")];

        let err = router
            .generate(&messages, Some("claude-3-5-haiku-latest"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));

        let err = router.generate(&messages, Some("gpt-4o")).await.unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));

        let result = router.generate_stream(&messages, Some("o1-mini"));
        assert!(matches!(result, Err(LlmError::Configuration(_))));
    }

    #[test]
    fn default_model_is_resolved_when_unset() {
        let settings = Settings::default();
        let router = LlmRouter::new(&settings).unwrap();
        assert_eq!(router.resolve(None), settings.default_model);
        assert_eq!(router.resolve(Some("gpt-4o")), "gpt-4o");
    }
}
