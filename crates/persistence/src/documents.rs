//! Document rows and collection aggregates

use rusqlite::params;
use serde::Serialize;

use rag_engine_core::now_epoch_secs;

use crate::{Store, StoreError};

/// One ingested document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub collection: String,
    pub filename: String,
    pub file_type: String,
    pub chunk_count: i64,
    pub token_count: i64,
    pub metadata: serde_json::Value,
}

/// Per-collection aggregate over document rows.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub doc_count: i64,
    pub total_chunks: i64,
    pub total_tokens: i64,
}

impl Store {
    /// Insert or replace a document row.
    pub async fn upsert_document(&self, doc: DocumentRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO documents
                 (id, collection, filename, file_type, chunk_count, token_count, ingested_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    doc.id,
                    doc.collection,
                    doc.filename,
                    doc.file_type,
                    doc.chunk_count,
                    doc.token_count,
                    now_epoch_secs(),
                    serde_json::to_string(&doc.metadata)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Aggregate stats per collection, ordered by name.
    pub async fn collections(&self) -> Result<Vec<CollectionStats>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT collection, COUNT(*), COALESCE(SUM(chunk_count), 0), COALESCE(SUM(token_count), 0)
                 FROM documents GROUP BY collection ORDER BY collection",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(CollectionStats {
                        collection: row.get(0)?,
                        doc_count: row.get(1)?,
                        total_chunks: row.get(2)?,
                        total_tokens: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Delete all document rows of a collection; returns the count removed.
    pub async fn delete_collection_documents(
        &self,
        collection: &str,
    ) -> Result<usize, StoreError> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let deleted =
                conn.execute("DELETE FROM documents WHERE collection = ?1", [collection])?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, collection: &str, chunks: i64, tokens: i64) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            collection: collection.to_string(),
            filename: format!("{}.txt", id),
            file_type: "text".to_string(),
            chunk_count: chunks,
            token_count: tokens,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn collections_aggregate_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store.upsert_document(doc("a", "kb", 3, 100)).await.unwrap();
        store.upsert_document(doc("b", "kb", 2, 50)).await.unwrap();
        store.upsert_document(doc("c", "other", 1, 10)).await.unwrap();

        let stats = store.collections().await.unwrap();
        assert_eq!(stats.len(), 2);
        let kb = stats.iter().find(|s| s.collection == "kb").unwrap();
        assert_eq!(kb.doc_count, 2);
        assert_eq!(kb.total_chunks, 5);
        assert_eq!(kb.total_tokens, 150);
    }

    #[tokio::test]
    async fn delete_removes_only_target_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store.upsert_document(doc("a", "kb", 1, 1)).await.unwrap();
        store.upsert_document(doc("b", "other", 1, 1)).await.unwrap();

        let removed = store.delete_collection_documents("kb").await.unwrap();
        assert_eq!(removed, 1);

        let stats = store.collections().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].collection, "other");
    }
}
