//! Test-set management and question auto-generation

use serde::Serialize;
use uuid::Uuid;

use rag_engine_llm::{LlmRouter, Message};
use rag_engine_persistence::{Store, TestQuestion};
use rag_engine_retrieval::VectorStore;

use crate::PipelineError;

/// Creation summary returned to the API.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedTestSet {
    pub id: String,
    pub name: String,
    pub collection: String,
    pub question_count: usize,
}

/// Store a named test set.
pub async fn create_test_set(
    store: &Store,
    name: &str,
    collection: &str,
    questions: Vec<TestQuestion>,
) -> Result<CreatedTestSet, PipelineError> {
    let id = Uuid::new_v4().to_string();
    store.insert_test_set(&id, name, collection, &questions).await?;

    Ok(CreatedTestSet {
        id,
        name: name.to_string(),
        collection: collection.to_string(),
        question_count: questions.len(),
    })
}

/// Generate evaluation questions from a collection's own content.
///
/// Samples chunk texts, asks the LLM for a JSON array of question and
/// ground-truth pairs, strips code fences, and truncates to the requested
/// count. Any failure collapses to an empty list.
pub async fn auto_generate_questions(
    vector_store: &VectorStore,
    llm: &LlmRouter,
    collection: &str,
    num_questions: usize,
    model: Option<&str>,
) -> Vec<TestQuestion> {
    let sample_limit = 20.min(num_questions * 2).max(1);
    let chunks = match vector_store.scroll_texts(collection, sample_limit).await {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::warn!(collection, error = %e, "Question generation: scroll failed");
            return Vec::new();
        }
    };

    if chunks.is_empty() {
        return Vec::new();
    }

    let context = chunks
        .iter()
        .take(10)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    let prompt = format!(
        "Based on the following document excerpts, generate {num_questions} diverse questions \
         that could be answered using this content.\n\n\
         Document Excerpts:\n{context}\n\n\
         Generate exactly {num_questions} questions. For each question, also provide the \
         expected answer based on the content.\n\n\
         Format your response as a JSON array like this:\n\
         [\n  {{\"question\": \"What is ...\", \"ground_truth\": \"The answer is ...\"}},\n  ...\n]\n\n\
         Respond with ONLY the JSON array, no other text."
    );

    let response = match llm.generate(&[Message::user(prompt)], model).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Auto-generate questions failed");
            return Vec::new();
        }
    };

    let content = strip_code_fence(response.content.trim());
    match serde_json::from_str::<Vec<TestQuestion>>(&content) {
        Ok(mut questions) => {
            questions.truncate(num_questions);
            questions
        }
        Err(e) => {
            tracing::error!(error = %e, "Auto-generate questions returned invalid JSON");
            Vec::new()
        }
    }
}

fn strip_code_fence(content: &str) -> String {
    if !content.starts_with("```") {
        return content.to_string();
    }
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= 2 {
        return content.to_string();
    }
    lines[1..lines.len() - 1].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fences_are_stripped() {
        let fenced = "```json\n[{\"question\": \"Q?\"}]\n```";
        assert_eq!(strip_code_fence(fenced), "[{\"question\": \"Q?\"}]");

        let bare = "[{\"question\": \"Q?\"}]";
        assert_eq!(strip_code_fence(bare), bare);
    }

    #[test]
    fn questions_parse_with_optional_ground_truth() {
        let json = r#"[
            {"question": "What is BM25?", "ground_truth": "A scoring function"},
            {"question": "What is RRF?"}
        ]"#;
        let questions: Vec<TestQuestion> = serde_json::from_str(json).unwrap();
        assert_eq!(questions.len(), 2);
        assert!(questions[1].ground_truth.is_none());
    }
}
