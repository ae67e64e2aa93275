//! Anthropic Messages API backend
//!
//! The system message is split into the request's `system` field; chat
//! history goes into `messages`. Streaming parses server-sent events
//! (`data: {json}` lines) and ignores malformed chunks.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::prompt::{Message, Role};
use crate::router::{BackendResponse, LlmStream};
use crate::LlmError;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 1024;

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

impl AnthropicBackend {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: "https://api.anthropic.com".to_string(),
        }
    }

    fn build_request(&self, messages: &[Message], model: &str, stream: bool) -> MessagesRequest {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let api_messages = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                    Role::System => unreachable!("system messages filtered above"),
                },
                content: m.content.clone(),
            })
            .collect();

        MessagesRequest {
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            messages: api_messages,
            system,
            stream: stream.then_some(true),
        }
    }

    pub async fn generate(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<BackendResponse, LlmError> {
        let request = self.build_request(messages, model, false);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Anthropic returned {}: {}", status, body)));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(BackendResponse {
            content,
            input_tokens: Some(parsed.usage.input_tokens),
            output_tokens: Some(parsed.usage.output_tokens),
        })
    }

    pub fn generate_stream(&self, messages: &[Message], model: &str) -> LlmStream {
        let request = self.build_request(messages, model, true);
        let body = serde_json::to_value(&request).unwrap_or_default();
        let client = self.client.clone();
        let url = format!("{}/v1/messages", self.endpoint);
        let api_key = self.api_key.clone();

        Box::pin(async_stream::try_stream! {
            let response = client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                Err(LlmError::Api(format!("Anthropic returned {}: {}", status, text)))?;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
                        continue;
                    };
                    if let StreamEvent::ContentBlockDelta {
                        delta: Delta::TextDelta { text },
                    } = event
                    {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_moves_into_system_field() {
        let backend = AnthropicBackend::new(Client::new(), "key");
        let messages = vec![Message::system("ground rules"), Message::user("question")];
        let request = backend.build_request(&messages, "claude-3-5-haiku-latest", false);

        assert_eq!(request.system.as_deref(), Some("ground rules"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn response_parsing_collects_text_blocks() {
        let json = r#"{
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;

        let parsed: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.usage.input_tokens, 10);
        assert_eq!(parsed.content.len(), 2);
    }

    #[test]
    fn delta_events_parse_text() {
        let json = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"tok"}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            } => assert_eq!(text, "tok"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_events_parse_as_other() {
        let json = r#"{"type":"message_start","message":{}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, StreamEvent::Other));
    }
}
