//! Upload, job status and collection endpoints
//!
//! Uploads are validated (count, size, extension), staged under the
//! upload directory and processed by a background task; the request
//! returns immediately with a job id. A 503 is returned when the vector
//! store is unreachable so clients do not stage work that cannot finish.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use rag_engine_config::ChunkingStrategy;
use rag_engine_ingest::{is_supported, process_ingestion};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub total_chunks: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub doc_count: i64,
    pub total_chunks: i64,
    pub total_tokens: i64,
    pub vectors_count: u64,
}

struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

pub async fn ingest_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let mut files: Vec<UploadedFile> = Vec::new();
    let mut collection = "documents".to_string();
    let mut strategy = state.settings.chunking_strategy;
    let mut chunk_size = state.settings.chunk_size;
    let mut chunk_overlap = state.settings.chunk_overlap;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                if filename.is_empty() {
                    continue;
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?
                    .to_vec();
                files.push(UploadedFile { filename, bytes });
            }
            "collection" => {
                collection = field.text().await.unwrap_or_default();
            }
            "chunking_strategy" => {
                let value = field.text().await.unwrap_or_default();
                strategy = match value.as_str() {
                    "fixed" => ChunkingStrategy::Fixed,
                    "recursive" => ChunkingStrategy::Recursive,
                    "semantic" => ChunkingStrategy::Semantic,
                    other => {
                        return Err(ApiError::bad_request(format!(
                            "Unknown chunking strategy: {}",
                            other
                        )))
                    }
                };
            }
            "chunk_size" => {
                if let Ok(value) = field.text().await.unwrap_or_default().parse() {
                    chunk_size = value;
                }
            }
            "chunk_overlap" => {
                if let Ok(value) = field.text().await.unwrap_or_default().parse() {
                    chunk_overlap = value;
                }
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ApiError::bad_request("No files provided"));
    }
    if files.len() > state.settings.max_files_per_upload {
        return Err(ApiError::bad_request(format!(
            "Too many files. Maximum {} files per upload, got {}.",
            state.settings.max_files_per_upload,
            files.len()
        )));
    }

    let max_bytes = state.settings.max_file_size_mb * 1024 * 1024;
    for file in &files {
        if !is_supported(&file.filename) {
            return Err(ApiError::bad_request(format!(
                "Unsupported file type in '{}'",
                file.filename
            )));
        }
        if file.bytes.len() as u64 > max_bytes {
            return Err(ApiError::bad_request(format!(
                "File '{}' exceeds {}MB limit.",
                file.filename, state.settings.max_file_size_mb
            )));
        }
    }

    if !state.vector_store.ping().await {
        return Err(ApiError::unavailable(format!(
            "Vector store is not available at {}. Start it before uploading.",
            state.settings.qdrant_url
        )));
    }

    let job_id = Uuid::new_v4().to_string();
    state
        .store
        .insert_ingestion_job(&job_id, &collection, files.len())
        .await?;

    let upload_dir = PathBuf::from(&state.settings.upload_dir);
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create upload dir: {}", e)))?;

    let mut saved_paths: Vec<PathBuf> = Vec::with_capacity(files.len());
    for file in &files {
        let path = upload_dir.join(format!("{}_{}", job_id, file.filename));
        tokio::fs::write(&path, &file.bytes)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to stage upload: {}", e)))?;
        saved_paths.push(path);
    }

    let file_count = files.len();
    tokio::spawn(process_ingestion(
        Arc::clone(&state.ingest),
        job_id.clone(),
        saved_paths,
        collection.clone(),
        strategy,
        chunk_size,
        chunk_overlap,
    ));

    Ok(Json(IngestResponse {
        job_id,
        status: "processing".to_string(),
        message: format!(
            "Ingesting {} file(s) into collection '{}'",
            file_count, collection
        ),
    }))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let job = state
        .store
        .ingestion_job(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    Ok(Json(JobStatus {
        job_id: job.id,
        status: job.status,
        total_files: job.total_files,
        processed_files: job.processed_files,
        total_chunks: job.total_chunks,
        error: job.error,
    }))
}

pub async fn list_collections(
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionInfo>>, ApiError> {
    let stats = state.store.collections().await?;

    let mut result = Vec::with_capacity(stats.len());
    for stat in stats {
        let vectors_count = state.vector_store.points_count(&stat.collection).await;
        result.push(CollectionInfo {
            name: stat.collection,
            doc_count: stat.doc_count,
            total_chunks: stat.total_chunks,
            total_tokens: stat.total_tokens,
            vectors_count,
        });
    }

    Ok(Json(result))
}

pub async fn delete_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Err(e) = state.vector_store.delete_collection(&name).await {
        tracing::warn!(collection = %name, error = %e, "Vector collection delete failed");
    }
    state.store.delete_collection_documents(&name).await?;
    if let Err(e) = state.sparse.remove(&name) {
        tracing::warn!(collection = %name, error = %e, "Sparse index delete failed");
    }

    Ok(Json(serde_json::json!({
        "status": "deleted",
        "collection": name,
    })))
}
