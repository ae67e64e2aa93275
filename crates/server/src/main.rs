//! RAG engine server entry point

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use rag_engine_config::{load_settings, Settings};
use rag_engine_server::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing is not up yet, so early config problems go to stderr.
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting RAG engine");

    let state = AppState::build(settings)?;

    state.store.init().await?;
    tracing::info!("Database initialized");

    if state.cache.enabled() {
        state.cache.ensure_collection().await;
        tracing::info!("Query cache initialized");
    }

    if state.llm.local_health().await {
        let models: Vec<String> = state
            .llm
            .local_models()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        tracing::info!(?models, "Local LLM endpoint connected");
    } else {
        tracing::warn!("Local LLM endpoint not available. LLM features will fail until connected.");
    }

    let addr: SocketAddr = format!("{}:{}", state.settings.host, state.settings.port).parse()?;
    let router = create_router(state);

    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
