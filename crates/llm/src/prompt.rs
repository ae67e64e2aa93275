//! Prompt construction
//!
//! Builds the grounded system/user message pair from ranked chunks under a
//! token budget and emits the citation metadata returned to clients.

use serde::{Deserialize, Serialize};

use rag_engine_core::count_tokens;
use rag_engine_retrieval::RankedResult;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Citation metadata for one packed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    /// 1-based index matching the `[Source N]` labels in the prompt.
    pub index: usize,
    /// First 200 characters of the chunk.
    pub text: String,
    pub source: String,
    pub score: f32,
    pub chunk_index: usize,
}

pub const SYSTEM_PROMPT: &str = "You are a precise, helpful assistant that answers questions based ONLY on the provided context.\n\n\
Rules:\n\
1. Only use information from the provided context to answer.\n\
2. If the context doesn't contain enough information, say \"I don't have enough information to answer this question based on the provided documents.\"\n\
3. Cite your sources by referencing [Source N] where N corresponds to the context chunk number.\n\
4. Never make up or hallucinate information.\n\
5. Be concise and direct in your answers.\n\
6. If multiple sources support your answer, cite all relevant ones.";

/// Reserve for the answer and message framing, on top of system + query.
const RESPONSE_RESERVE: usize = 200;

/// Build `(system_prompt, user_prompt, sources)` from ranked chunks.
///
/// Chunks are packed greedily in rank order; packing stops at the first
/// chunk that would push the context past
/// `max_context_tokens - tokens(system) - tokens(query) - 200`.
pub fn build_prompt(
    query: &str,
    results: &[RankedResult],
    max_context_tokens: usize,
) -> (String, String, Vec<SourceInfo>) {
    let overhead = count_tokens(SYSTEM_PROMPT) + count_tokens(query) + RESPONSE_RESERVE;
    let token_budget = max_context_tokens.saturating_sub(overhead);

    let mut context_parts: Vec<String> = Vec::new();
    let mut sources: Vec<SourceInfo> = Vec::new();
    let mut used_tokens = 0;

    for (i, result) in results.iter().enumerate() {
        let chunk_tokens = count_tokens(&result.text);
        if used_tokens + chunk_tokens > token_budget {
            break;
        }

        let source = result
            .metadata
            .get("source")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("chunk_{}", result.chunk_index));

        let mut source_detail = source.clone();
        if let Some(page) = result.metadata.get("page").and_then(|v| v.as_u64()) {
            source_detail.push_str(&format!(" (page {})", page));
        }

        context_parts.push(format!(
            "[Source {}] ({}):\n{}",
            i + 1,
            source_detail,
            result.text
        ));
        sources.push(SourceInfo {
            index: i + 1,
            text: truncate_chars(&result.text, 200),
            source,
            score: result.score,
            chunk_index: result.chunk_index,
        });
        used_tokens += chunk_tokens;
    }

    let context_block = context_parts.join("\n\n---\n\n");
    let user_prompt = format!(
        "Context:\n{}\n\nQuestion: {}\n\nAnswer the question based only on the context above. Cite sources using [Source N] notation.",
        context_block, query
    );

    (SYSTEM_PROMPT.to_string(), user_prompt, sources)
}

/// System + user pair ready for the router.
pub fn format_messages(system: &str, user: &str) -> Vec<Message> {
    vec![Message::system(system), Message::user(user)]
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(limit).collect();
        format!("{}...", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_engine_core::Metadata;

    fn ranked(text: &str, chunk_index: usize, source: Option<&str>) -> RankedResult {
        let mut metadata = Metadata::new();
        if let Some(s) = source {
            metadata.insert("source".to_string(), serde_json::json!(s));
        }
        RankedResult {
            text: text.to_string(),
            score: 0.5,
            vector_score: 0.5,
            sparse_score: 0.0,
            chunk_index,
            metadata,
        }
    }

    #[test]
    fn prompt_cites_sources_in_order() {
        let results = vec![
            ranked("Paris is the capital of France.", 0, Some("geo.md")),
            ranked("Berlin is the capital of Germany.", 1, Some("geo.md")),
        ];

        let (system, user, sources) = build_prompt("What is the capital of France?", &results, 4096);

        assert_eq!(system, SYSTEM_PROMPT);
        assert!(user.contains("[Source 1] (geo.md):"));
        assert!(user.contains("[Source 2] (geo.md):"));
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].index, 1);
        assert_eq!(sources[1].index, 2);
        assert_eq!(sources[0].source, "geo.md");
    }

    #[test]
    fn packing_respects_token_budget() {
        let big = "word ".repeat(2000);
        let results = vec![
            ranked("small chunk that fits", 0, None),
            ranked(&big, 1, None),
            ranked("another small chunk", 2, None),
        ];

        let max_context_tokens = 512;
        let (_, user, sources) = build_prompt("query", &results, max_context_tokens);

        // The oversized chunk stops the packing; only the first chunk lands.
        assert_eq!(sources.len(), 1);
        let budget =
            max_context_tokens - count_tokens(SYSTEM_PROMPT) - count_tokens("query") - 200;
        let packed: usize = sources.iter().map(|s| count_tokens(&s.text)).sum();
        assert!(packed <= budget);
        assert!(!user.contains("word word word word word word word word word word"));
    }

    #[test]
    fn missing_source_falls_back_to_chunk_label() {
        let results = vec![ranked("orphan text", 7, None)];
        let (_, user, sources) = build_prompt("q", &results, 4096);

        assert!(user.contains("(chunk_7)"));
        assert_eq!(sources[0].source, "chunk_7");
    }

    #[test]
    fn long_chunks_are_truncated_in_source_metadata() {
        let long = "x".repeat(400);
        let results = vec![ranked(&long, 0, Some("big.txt"))];
        let (_, _, sources) = build_prompt("q", &results, 8192);

        assert_eq!(sources[0].text.chars().count(), 203);
        assert!(sources[0].text.ends_with("..."));
    }

    #[test]
    fn page_metadata_lands_in_source_detail() {
        let mut result = ranked("page text", 0, Some("doc.pdf"));
        result.metadata.insert("page".to_string(), serde_json::json!(3));

        let (_, user, _) = build_prompt("q", &[result], 4096);
        assert!(user.contains("(doc.pdf (page 3)):"));
    }
}
