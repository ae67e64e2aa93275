//! Vector store adapter over Qdrant
//!
//! Multi-collection adapter: collection management, batched upserts,
//! cosine top-k search with an optional `source` payload filter, and
//! payload conversion between JSON and Qdrant value kinds. The vector
//! dimension is fixed per collection at creation time.

use std::collections::HashMap;

use qdrant_client::qdrant::{
    condition::ConditionOneOf, r#match::MatchValue, value::Kind, Condition,
    CreateCollectionBuilder, Distance, FieldCondition, Filter, ListValue, Match,
    ScrollPointsBuilder, SearchPointsBuilder, Struct, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::qdrant::PointStruct;
use qdrant_client::Qdrant;

use rag_engine_core::Metadata;

use crate::RetrievalError;

/// A point ready for upsert.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    /// 63-bit point identity, derived from a content hash by callers.
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Metadata,
}

/// A scored payload returned from search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub score: f32,
    pub payload: Metadata,
}

/// Qdrant client wrapper.
pub struct VectorStore {
    client: Qdrant,
}

const UPSERT_BATCH: usize = 100;

impl VectorStore {
    pub fn new(url: &str, api_key: Option<&str>) -> Result<Self, RetrievalError> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Cheap reachability probe used before accepting uploads.
    pub async fn ping(&self) -> bool {
        self.client.list_collections().await.is_ok()
    }

    /// Create `name` with the given dimension if it does not exist.
    pub async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), RetrievalError> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                        dimension as u64,
                        Distance::Cosine,
                    )),
                )
                .await
                .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;
            tracing::info!(collection = name, dimension, "Created collection");
        }

        Ok(())
    }

    /// Upsert points in batches of 100.
    pub async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), RetrievalError> {
        let total = points.len();
        let points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let payload: HashMap<String, QdrantValue> = p
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, json_to_qdrant(v)))
                    .collect();
                PointStruct::new(p.id, p.vector, payload)
            })
            .collect();

        for batch in points.chunks(UPSERT_BATCH) {
            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, batch.to_vec()))
                .await
                .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;
        }
        tracing::debug!(collection, points = total, "Upserted points");

        Ok(())
    }

    /// Cosine top-k search with payloads.
    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        let mut builder =
            SearchPointsBuilder::new(collection, vector.to_vec(), top_k as u64).with_payload(true);

        if let Some(source) = source_filter {
            builder = builder.filter(source_eq_filter(source));
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| VectorHit {
                score: point.score,
                payload: point
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, qdrant_to_json(v)))
                    .collect(),
            })
            .collect())
    }

    /// Drop a collection. Returns whether the server acknowledged it.
    pub async fn delete_collection(&self, name: &str) -> Result<bool, RetrievalError> {
        let response = self
            .client
            .delete_collection(name)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;
        Ok(response.result)
    }

    /// Point count of a collection; 0 for missing collections.
    pub async fn points_count(&self, name: &str) -> u64 {
        match self.client.collection_info(name).await {
            Ok(info) => info
                .result
                .and_then(|r| r.points_count)
                .unwrap_or_default(),
            Err(_) => 0,
        }
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool, RetrievalError> {
        self.client
            .collection_exists(name)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))
    }

    /// Chunk texts sampled from a collection (for question generation).
    pub async fn scroll_texts(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .limit(limit as u32)
                    .with_payload(true),
            )
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                point.payload.get("text").and_then(|v| match &v.kind {
                    Some(Kind::StringValue(s)) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                })
            })
            .collect())
    }
}

/// Derive a stable 63-bit point id from a content key.
///
/// First 8 bytes of sha256, reduced mod 2^63 so it fits Qdrant's unsigned
/// integer ids with the sign bit clear. Collisions silently overwrite.
pub fn hash_point_id(key: &str) -> u64 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes) & (u64::MAX >> 1)
}

fn source_eq_filter(source: &str) -> Filter {
    Filter {
        must: vec![Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: "source".to_string(),
                r#match: Some(Match {
                    match_value: Some(MatchValue::Keyword(source.to_string())),
                }),
                ..Default::default()
            })),
        }],
        ..Default::default()
    }
}

/// JSON value to Qdrant payload value.
pub fn json_to_qdrant(value: serde_json::Value) -> QdrantValue {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Kind::IntegerValue(i)
            } else {
                Kind::DoubleValue(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant(v)))
                .collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

/// Qdrant payload value to JSON.
pub fn qdrant_to_json(value: QdrantValue) -> serde_json::Value {
    match value.kind {
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(d).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(fields)) => serde_json::Value::Object(
            fields
                .fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_conversion_roundtrip() {
        let json = serde_json::json!({
            "text": "chunk body",
            "chunk_index": 3,
            "score": 0.25,
            "nested": {"page": 2},
            "tags": ["a", "b"],
            "flag": true,
        });

        let qdrant = json_to_qdrant(json.clone());
        assert_eq!(qdrant_to_json(qdrant), json);
    }

    #[test]
    fn point_ids_are_stable_and_63_bit() {
        let a = hash_point_id("docs:what is rust");
        let b = hash_point_id("docs:what is rust");
        let c = hash_point_id("docs:what is go");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < (1u64 << 63));
    }

    #[test]
    fn source_filter_targets_source_key() {
        let filter = source_eq_filter("report.pdf");
        assert_eq!(filter.must.len(), 1);
        match &filter.must[0].condition_one_of {
            Some(ConditionOneOf::Field(field)) => assert_eq!(field.key, "source"),
            other => panic!("unexpected condition: {:?}", other),
        }
    }
}
