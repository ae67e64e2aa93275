//! Embeddings client
//!
//! Batched text embedding over HTTP. Local models go through an
//! Ollama-compatible `/api/embed` endpoint; `text-embedding-3-small` goes
//! to the OpenAI embeddings API. All vectors are L2-normalized so cosine
//! scores are comparable across providers.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use rag_engine_config::{EmbeddingModel, Settings};

use crate::RetrievalError;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OPENAI_BATCH_CAP: usize = 100;

/// Embeddings client routed by configured model.
pub struct Embedder {
    client: Client,
    model: EmbeddingModel,
    batch_size: usize,
    ollama_url: String,
    openai_api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl Embedder {
    pub fn new(settings: &Settings) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            model: settings.embedding_model,
            batch_size: settings.embedding_batch_size.max(1),
            ollama_url: settings.ollama_url.clone(),
            openai_api_key: settings.openai_api_key.clone(),
        })
    }

    /// Vector dimension of the configured model.
    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    /// Model identifier reported in health and settings endpoints.
    pub fn model_id(&self) -> &'static str {
        self.model.model_id()
    }

    /// Embed a batch of texts, preserving input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = match self.model {
            EmbeddingModel::TextEmbedding3Small => self.batch_size.min(OPENAI_BATCH_CAP),
            _ => self.batch_size,
        };

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let mut embeddings = match self.model {
                EmbeddingModel::TextEmbedding3Small => self.embed_openai(batch).await?,
                _ => self.embed_local(batch).await?,
            };
            if embeddings.len() != batch.len() {
                return Err(RetrievalError::Embedding(format!(
                    "Provider returned {} embeddings for {} inputs",
                    embeddings.len(),
                    batch.len()
                )));
            }
            for vector in embeddings.iter_mut() {
                l2_normalize(vector);
            }
            all.append(&mut embeddings);
            tracing::debug!(embedded = all.len(), total = texts.len(), "Embedded batch");
        }

        Ok(all)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::Embedding("No embedding returned".to_string()))
    }

    async fn embed_local(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let request = OllamaEmbedRequest {
            model: self.model.model_id(),
            input: texts,
        };

        let url = format!("{}/api/embed", self.ollama_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "Embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Invalid embed response: {}", e)))?;

        Ok(parsed.embeddings)
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let api_key = self.openai_api_key.as_deref().ok_or_else(|| {
            RetrievalError::Embedding(
                "OpenAI API key required for text-embedding-3-small".to_string(),
            )
        })?;

        let request = OpenAiEmbedRequest {
            model: self.model.model_id(),
            input: texts,
        };

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "OpenAI embeddings returned {}: {}",
                status, body
            )));
        }

        let parsed: OpenAiEmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Invalid embed response: {}", e)))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn embedder_reports_model_dimension() {
        let settings = Settings::default();
        let embedder = Embedder::new(&settings).unwrap();
        assert_eq!(embedder.dimension(), 384);
        assert_eq!(embedder.model_id(), "all-MiniLM-L6-v2");
    }
}
