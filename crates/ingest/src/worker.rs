//! Background ingestion worker
//!
//! Runs outside the request lifetime: the upload handler stores files,
//! inserts a job row and spawns `process_ingestion`. Per-file failures are
//! logged and skipped; the job ends `completed` or `failed`. Staged files
//! are deleted once processed.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use rag_engine_config::{ChunkingStrategy, Settings};
use rag_engine_core::{Chunk, Metadata};
use rag_engine_persistence::{DocumentRecord, JobUpdate, Store};
use rag_engine_retrieval::{hash_point_id, Embedder, SparseRegistry, VectorPoint, VectorStore};

use crate::chunker::{chunk_document_pages, chunk_text};
use crate::loader::load_document;
use crate::IngestError;

/// Dependencies the worker needs.
pub struct IngestContext {
    pub embedder: Arc<Embedder>,
    pub vector_store: Arc<VectorStore>,
    pub sparse: Arc<SparseRegistry>,
    pub store: Store,
}

/// Process one ingestion job to completion.
pub async fn process_ingestion(
    ctx: Arc<IngestContext>,
    job_id: String,
    file_paths: Vec<PathBuf>,
    collection: String,
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
) {
    let result = run_job(
        &ctx,
        &job_id,
        &file_paths,
        &collection,
        strategy,
        chunk_size,
        chunk_overlap,
    )
    .await;

    if let Err(e) = result {
        tracing::error!(job_id = %job_id, error = %e, "Ingestion job failed");
        let _ = ctx
            .store
            .update_ingestion_job(
                &job_id,
                JobUpdate {
                    status: Some("failed".to_string()),
                    error: Some(e.to_string()),
                    ..Default::default()
                },
            )
            .await;
    }
}

async fn run_job(
    ctx: &IngestContext,
    job_id: &str,
    file_paths: &[PathBuf],
    collection: &str,
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<(), IngestError> {
    ctx.vector_store
        .ensure_collection(collection, ctx.embedder.dimension())
        .await?;

    let mut total_chunks: i64 = 0;

    for (i, path) in file_paths.iter().enumerate() {
        let outcome = ingest_file(ctx, path, collection, strategy, chunk_size, chunk_overlap).await;

        match outcome {
            Ok(chunk_count) => {
                total_chunks += chunk_count as i64;
                let progress = ctx
                    .store
                    .update_ingestion_job(
                        job_id,
                        JobUpdate {
                            processed_files: Some((i + 1) as i64),
                            total_chunks: Some(total_chunks),
                            ..Default::default()
                        },
                    )
                    .await;
                if let Err(e) = progress {
                    tracing::warn!(job_id, error = %e, "Failed to update job progress");
                }
            }
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "Failed to process file");
            }
        }

        if path.exists() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(file = %path.display(), error = %e, "Failed to delete staged file");
            }
        }
    }

    ctx.store
        .update_ingestion_job(
            job_id,
            JobUpdate {
                status: Some("completed".to_string()),
                processed_files: Some(file_paths.len() as i64),
                total_chunks: Some(total_chunks),
                ..Default::default()
            },
        )
        .await?;

    Ok(())
}

async fn ingest_file(
    ctx: &IngestContext,
    path: &PathBuf,
    collection: &str,
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<usize, IngestError> {
    let doc = load_document(path)?;
    let doc_id = Uuid::new_v4().to_string();

    let mut source_meta = Metadata::new();
    source_meta.insert("source".to_string(), serde_json::json!(doc.filename));
    source_meta.insert("file_type".to_string(), serde_json::json!(doc.file_type));
    source_meta.insert("doc_id".to_string(), serde_json::json!(doc_id));

    let chunks = if doc.pages.is_empty() {
        chunk_text(&doc.text, strategy, chunk_size, chunk_overlap, Some(&source_meta))
    } else {
        chunk_document_pages(&doc.pages, strategy, chunk_size, chunk_overlap, Some(&source_meta))
    };

    if chunks.is_empty() {
        return Ok(0);
    }

    index_chunks(ctx, &chunks, collection, &doc_id).await?;

    let token_count: i64 = chunks.iter().map(|c| c.token_count as i64).sum();
    ctx.store
        .upsert_document(DocumentRecord {
            id: doc_id,
            collection: collection.to_string(),
            filename: doc.filename,
            file_type: doc.file_type,
            chunk_count: chunks.len() as i64,
            token_count,
            metadata: serde_json::to_value(&doc.metadata).unwrap_or_default(),
        })
        .await?;

    Ok(chunks.len())
}

/// Embed chunks and index them into the dense and sparse stores.
async fn index_chunks(
    ctx: &IngestContext,
    chunks: &[Chunk],
    collection: &str,
    doc_id: &str,
) -> Result<(), IngestError> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = ctx.embedder.embed(&texts).await?;

    let points: Vec<VectorPoint> = chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, vector)| {
            let mut payload = chunk.metadata.clone();
            payload.insert("text".to_string(), serde_json::json!(chunk.text));
            payload.insert("doc_id".to_string(), serde_json::json!(doc_id));
            payload.insert(
                "chunk_index".to_string(),
                serde_json::json!(chunk.chunk_index),
            );
            payload.insert(
                "token_count".to_string(),
                serde_json::json!(chunk.token_count),
            );
            VectorPoint {
                id: hash_point_id(&format!("{}_{}", doc_id, chunk.chunk_index)),
                vector,
                payload,
            }
        })
        .collect();

    ctx.vector_store.upsert(collection, points).await?;

    let metadata: Vec<Metadata> = chunks.iter().map(|c| c.metadata.clone()).collect();
    ctx.sparse.append(collection, texts, metadata)?;

    Ok(())
}

/// Result of a direct text ingestion (MCP `rag_ingest_text`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TextIngestReport {
    pub doc_id: String,
    pub chunks_created: usize,
    pub total_tokens: usize,
    pub collection: String,
}

/// Ingest raw text synchronously: chunk, embed, index, record.
pub async fn ingest_text(
    ctx: &IngestContext,
    settings: &Settings,
    text: &str,
    collection: &str,
    source_name: &str,
) -> Result<TextIngestReport, IngestError> {
    ctx.vector_store
        .ensure_collection(collection, ctx.embedder.dimension())
        .await?;

    let doc_id = Uuid::new_v4().to_string();
    let mut source_meta = Metadata::new();
    source_meta.insert("source".to_string(), serde_json::json!(source_name));
    source_meta.insert("doc_id".to_string(), serde_json::json!(doc_id));

    let chunks = chunk_text(
        text,
        settings.chunking_strategy,
        settings.chunk_size,
        settings.chunk_overlap,
        Some(&source_meta),
    );

    if !chunks.is_empty() {
        index_chunks(ctx, &chunks, collection, &doc_id).await?;
    }

    let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
    ctx.store
        .upsert_document(DocumentRecord {
            id: doc_id.clone(),
            collection: collection.to_string(),
            filename: source_name.to_string(),
            file_type: "text".to_string(),
            chunk_count: chunks.len() as i64,
            token_count: total_tokens as i64,
            metadata: serde_json::json!({}),
        })
        .await?;

    Ok(TextIngestReport {
        doc_id,
        chunks_created: chunks.len(),
        total_tokens,
        collection: collection.to_string(),
    })
}
