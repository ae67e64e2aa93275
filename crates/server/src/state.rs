//! Application state
//!
//! All long-lived components are built once at startup and shared behind
//! `Arc`s; axum clones the state per request.

use std::sync::Arc;

use rag_engine_config::Settings;
use rag_engine_ingest::IngestContext;
use rag_engine_llm::{LlmError, LlmRouter};
use rag_engine_persistence::Store;
use rag_engine_pipeline::{QueryCache, QueryPipeline};
use rag_engine_retrieval::{
    Embedder, HybridRanker, RankerDefaults, RetrievalError, SparseRegistry, VectorStore,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub embedder: Arc<Embedder>,
    pub vector_store: Arc<VectorStore>,
    pub sparse: Arc<SparseRegistry>,
    pub llm: Arc<LlmRouter>,
    pub cache: Arc<QueryCache>,
    pub pipeline: Arc<QueryPipeline>,
    pub ingest: Arc<IngestContext>,
}

/// Errors building the state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AppState {
    /// Wire up every component from settings.
    pub fn build(settings: Settings) -> Result<Self, StateError> {
        let settings = Arc::new(settings);

        let store = Store::new(&settings.db_path);
        let embedder = Arc::new(Embedder::new(&settings)?);
        let vector_store = Arc::new(VectorStore::new(
            &settings.qdrant_url,
            settings.qdrant_api_key.as_deref(),
        )?);
        let sparse = Arc::new(SparseRegistry::new(&settings.sparse_index_dir));
        let llm = Arc::new(LlmRouter::new(&settings)?);

        let ranker = Arc::new(HybridRanker::new(
            Arc::clone(&embedder),
            Arc::clone(&vector_store),
            Arc::clone(&sparse),
            RankerDefaults {
                top_k: settings.default_top_k,
                alpha: settings.hybrid_alpha,
            },
        ));

        let cache = Arc::new(QueryCache::new(
            Arc::clone(&embedder),
            Arc::clone(&vector_store),
            store.clone(),
            &settings,
        ));

        let pipeline = Arc::new(QueryPipeline::new(
            ranker,
            Arc::clone(&llm),
            Arc::clone(&cache),
            store.clone(),
            Arc::clone(&settings),
        ));

        let ingest = Arc::new(IngestContext {
            embedder: Arc::clone(&embedder),
            vector_store: Arc::clone(&vector_store),
            sparse: Arc::clone(&sparse),
            store: store.clone(),
        });

        Ok(Self {
            settings,
            store,
            embedder,
            vector_store,
            sparse,
            llm,
            cache,
            pipeline,
            ingest,
        })
    }
}
