//! Query endpoint, unary and streaming
//!
//! `stream=true` switches the response to a text/event-stream with three
//! event types: `sources` (citation metadata), `token` (text fragments)
//! and `done` (the assembled answer). Dropping the client connection
//! drops the stream, which stops the provider read upstream.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use rag_engine_llm::{build_prompt, format_messages};
use rag_engine_pipeline::QueryOptions;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub evaluate: bool,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub auto_tune: bool,
}

fn default_collection() -> String {
    "documents".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_true() -> bool {
    true
}

pub async fn query_rag(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    if request.stream {
        return Ok(stream_query(state, request).await.into_response());
    }

    let result = state
        .pipeline
        .run(
            &request.query,
            &request.collection,
            QueryOptions {
                top_k: Some(request.top_k),
                model: request.model,
                evaluate: request.evaluate,
                lightweight_eval: state.settings.eval_lightweight,
                alpha: request.alpha,
                auto_tune: request.auto_tune,
            },
        )
        .await?;

    Ok(Json(result).into_response())
}

async fn stream_query(
    state: AppState,
    request: QueryRequest,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let results = match state
            .pipeline
            .retrieve(&request.query, &request.collection, Some(request.top_k), request.alpha, None)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, "Streaming retrieval failed");
                yield Ok(event("done", serde_json::json!({ "answer": "" })));
                return;
            }
        };

        let (system_prompt, user_prompt, sources) =
            build_prompt(&request.query, &results, state.settings.max_context_tokens);
        yield Ok(event("sources", serde_json::json!(sources)));

        let messages = format_messages(&system_prompt, &user_prompt);
        let token_stream = match state.llm.generate_stream(&messages, request.model.as_deref()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Streaming generation failed to start");
                yield Ok(event("done", serde_json::json!({ "answer": "" })));
                return;
            }
        };

        let mut token_stream = token_stream;
        let mut full_answer = String::new();
        while let Some(fragment) = token_stream.next().await {
            match fragment {
                Ok(text) => {
                    full_answer.push_str(&text);
                    yield Ok(event("token", serde_json::json!(text)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Token stream ended with error");
                    break;
                }
            }
        }

        yield Ok(event("done", serde_json::json!({ "answer": full_answer })));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn event(event_type: &str, data: serde_json::Value) -> Event {
    let payload = serde_json::json!({ "type": event_type, "data": data });
    Event::default().data(payload.to_string())
}
