//! Ingestion job tracking
//!
//! Jobs are created when an upload is accepted and updated from the
//! background worker; clients poll them by id.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use rag_engine_core::now_epoch_secs;

use crate::{Store, StoreError};

/// One background ingestion job.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionJob {
    pub id: String,
    pub collection: String,
    pub status: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub total_chunks: i64,
    pub error: Option<String>,
    pub created_at: f64,
    pub completed_at: Option<f64>,
}

/// Partial update applied from the worker.
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    pub status: Option<String>,
    pub processed_files: Option<i64>,
    pub total_chunks: Option<i64>,
    pub error: Option<String>,
}

impl Store {
    /// Create a job in `processing` state.
    pub async fn insert_ingestion_job(
        &self,
        id: &str,
        collection: &str,
        total_files: usize,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO ingestion_jobs (id, collection, status, total_files, created_at)
                 VALUES (?1, ?2, 'processing', ?3, ?4)",
                params![id, collection, total_files as i64, now_epoch_secs()],
            )?;
            Ok(())
        })
        .await
    }

    /// Apply a partial update; terminal statuses also stamp `completed_at`.
    pub async fn update_ingestion_job(
        &self,
        id: &str,
        update: JobUpdate,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(status) = &update.status {
                sets.push(format!("status = ?{}", values.len() + 1));
                values.push(Box::new(status.clone()));
                if status == "completed" || status == "failed" {
                    sets.push(format!("completed_at = ?{}", values.len() + 1));
                    values.push(Box::new(now_epoch_secs()));
                }
            }
            if let Some(processed) = update.processed_files {
                sets.push(format!("processed_files = ?{}", values.len() + 1));
                values.push(Box::new(processed));
            }
            if let Some(chunks) = update.total_chunks {
                sets.push(format!("total_chunks = ?{}", values.len() + 1));
                values.push(Box::new(chunks));
            }
            if let Some(error) = &update.error {
                sets.push(format!("error = ?{}", values.len() + 1));
                values.push(Box::new(error.clone()));
            }
            if sets.is_empty() {
                return Ok(());
            }

            values.push(Box::new(id));
            let sql = format!(
                "UPDATE ingestion_jobs SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
        .await
    }

    pub async fn ingestion_job(&self, id: &str) -> Result<Option<IngestionJob>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let job = conn
                .query_row(
                    "SELECT id, collection, status, total_files, processed_files, total_chunks,
                            error, created_at, completed_at
                     FROM ingestion_jobs WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(IngestionJob {
                            id: row.get(0)?,
                            collection: row.get(1)?,
                            status: row.get(2)?,
                            total_files: row.get(3)?,
                            processed_files: row.get(4)?,
                            total_chunks: row.get(5)?,
                            error: row.get(6)?,
                            created_at: row.get(7)?,
                            completed_at: row.get(8)?,
                        })
                    },
                )
                .optional()?;
            Ok(job)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn job_lifecycle_updates_are_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();

        store.insert_ingestion_job("job1", "kb", 2).await.unwrap();

        store
            .update_ingestion_job(
                "job1",
                JobUpdate {
                    processed_files: Some(1),
                    total_chunks: Some(12),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let job = store.ingestion_job("job1").await.unwrap().unwrap();
        assert_eq!(job.status, "processing");
        assert_eq!(job.processed_files, 1);
        assert_eq!(job.total_chunks, 12);
        assert!(job.completed_at.is_none());

        store
            .update_ingestion_job(
                "job1",
                JobUpdate {
                    status: Some("completed".to_string()),
                    processed_files: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let job = store.ingestion_job("job1").await.unwrap().unwrap();
        assert_eq!(job.status, "completed");
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn missing_job_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("t.db"));
        store.init().await.unwrap();
        assert!(store.ingestion_job("nope").await.unwrap().is_none());
    }
}
