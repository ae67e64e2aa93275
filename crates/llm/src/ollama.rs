//! Local Ollama backend
//!
//! Chat completions against an Ollama-compatible `/api/chat` endpoint.
//! Streaming responses arrive as NDJSON, one chunk object per line;
//! malformed lines are skipped.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::prompt::{Message, Role};
use crate::router::{BackendResponse, LlmStream};
use crate::LlmError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaBackend {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified_at: Option<String>,
}

/// A locally available model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LocalModel {
    pub name: String,
    pub size: Option<u64>,
    pub modified_at: Option<String>,
}

impl OllamaBackend {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub async fn generate(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<BackendResponse, LlmError> {
        let request = ChatRequest {
            model,
            messages: messages.iter().map(ChatMessage::from).collect(),
            stream: false,
        };

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Ollama returned {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(BackendResponse {
            content: parsed.message.map(|m| m.content).unwrap_or_default(),
            input_tokens: parsed.prompt_eval_count,
            output_tokens: parsed.eval_count,
        })
    }

    /// Streamed generation; the returned sequence ends when the final
    /// chunk reports `done` or the connection closes.
    pub fn generate_stream(&self, messages: &[Message], model: &str) -> LlmStream {
        let request = ChatRequest {
            model,
            messages: messages.iter().map(ChatMessage::from).collect(),
            stream: true,
        };
        let body = serde_json::to_value(&request).unwrap_or_default();
        let client = self.client.clone();
        let url = self.api_url("/chat");

        Box::pin(async_stream::try_stream! {
            let response = client.post(&url).json(&body).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                Err(LlmError::Api(format!("Ollama returned {}: {}", status, text)))?;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            'outer: while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(parsed) = serde_json::from_str::<StreamChunk>(&line) else {
                        continue;
                    };
                    if let Some(message) = parsed.message {
                        if !message.content.is_empty() {
                            yield message.content;
                        }
                    }
                    if parsed.done {
                        break 'outer;
                    }
                }
            }
        })
    }

    /// 5-second health probe against `/api/tags`.
    pub async fn health(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Locally available models; failures collapse to an empty list.
    pub async fn list_models(&self) -> Vec<LocalModel> {
        let response = match self
            .client
            .get(self.api_url("/tags"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return Vec::new(),
        };

        match response.json::<TagsResponse>().await {
            Ok(tags) => tags
                .models
                .into_iter()
                .map(|m| LocalModel {
                    name: m.name,
                    size: m.size,
                    modified_at: m.modified_at,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roles_map_to_ollama_names() {
        let system = ChatMessage::from(&Message::system("s"));
        let user = ChatMessage::from(&Message::user("u"));
        assert_eq!(system.role, "system");
        assert_eq!(user.role, "user");
    }

    #[test]
    fn stream_chunks_parse_content_and_done() {
        let line = r#"{"message":{"role":"assistant","content":"hel"},"done":false}"#;
        let chunk: StreamChunk = serde_json::from_str(line).unwrap();
        assert_eq!(chunk.message.unwrap().content, "hel");
        assert!(!chunk.done);

        let done = r#"{"message":{"role":"assistant","content":""},"done":true}"#;
        let chunk: StreamChunk = serde_json::from_str(done).unwrap();
        assert!(chunk.done);
    }

    #[test]
    fn token_counts_come_from_eval_fields() {
        let body = r#"{"message":{"role":"assistant","content":"hi"},"prompt_eval_count":12,"eval_count":3}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.prompt_eval_count, Some(12));
        assert_eq!(parsed.eval_count, Some(3));
    }
}
