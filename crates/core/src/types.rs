//! Chunk model and dynamic metadata

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Dynamic per-chunk metadata.
///
/// Payloads crossing the vector-store boundary are JSON maps; the engine
/// only interprets the well-known keys (`source`, `page`, `doc_id`,
/// `chunk_index`, `strategy`) and carries everything else opaquely.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A chunk of ingested document text.
///
/// Chunks are produced once at ingestion time and immutable afterwards.
/// Stable identity is `(doc_id, chunk_index)` via the metadata map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub chunk_index: usize,
    pub token_count: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, chunk_index: usize, token_count: usize) -> Self {
        Self {
            text: text.into(),
            chunk_index,
            token_count,
            metadata: Metadata::new(),
        }
    }
}

/// Wall-clock time as fractional epoch seconds, the unit the relational
/// store records for every `created_at` column.
pub fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_metadata_roundtrip() {
        let mut chunk = Chunk::new("hello world", 0, 2);
        chunk
            .metadata
            .insert("source".to_string(), serde_json::json!("notes.md"));

        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text, "hello world");
        assert_eq!(back.metadata["source"], serde_json::json!("notes.md"));
    }

    #[test]
    fn epoch_secs_is_recent() {
        let now = now_epoch_secs();
        assert!(now > 1_700_000_000.0);
    }
}
