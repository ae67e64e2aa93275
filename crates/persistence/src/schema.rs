//! Schema creation

/// Full schema, applied idempotently at startup.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    filename TEXT NOT NULL,
    file_type TEXT NOT NULL,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    token_count INTEGER NOT NULL DEFAULT 0,
    ingested_at REAL NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

CREATE TABLE IF NOT EXISTS ingestion_jobs (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    total_files INTEGER NOT NULL DEFAULT 0,
    processed_files INTEGER NOT NULL DEFAULT 0,
    total_chunks INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at REAL NOT NULL,
    completed_at REAL
);

CREATE TABLE IF NOT EXISTS query_log (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    query TEXT NOT NULL,
    answer TEXT NOT NULL,
    sources TEXT NOT NULL DEFAULT '[]',
    model TEXT NOT NULL,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    latency_ms REAL NOT NULL DEFAULT 0,
    latency_retrieval_ms REAL NOT NULL DEFAULT 0,
    latency_generation_ms REAL NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    alpha REAL,
    top_k INTEGER,
    created_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_log_collection ON query_log(collection);
CREATE INDEX IF NOT EXISTS idx_query_log_created ON query_log(created_at);

CREATE TABLE IF NOT EXISTS eval_results (
    id TEXT PRIMARY KEY,
    query_id TEXT NOT NULL REFERENCES query_log(id),
    faithfulness REAL,
    relevance REAL,
    hallucination_rate REAL,
    context_precision REAL,
    context_recall REAL,
    created_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_eval_results_query ON eval_results(query_id);
CREATE INDEX IF NOT EXISTS idx_eval_results_created ON eval_results(created_at);

CREATE TABLE IF NOT EXISTS test_sets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    collection TEXT NOT NULL,
    questions TEXT NOT NULL DEFAULT '[]',
    created_at REAL NOT NULL,
    updated_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS eval_runs (
    id TEXT PRIMARY KEY,
    test_set_id TEXT NOT NULL REFERENCES test_sets(id),
    status TEXT NOT NULL DEFAULT 'pending',
    results TEXT NOT NULL DEFAULT '[]',
    avg_faithfulness REAL,
    avg_relevance REAL,
    avg_hallucination_rate REAL,
    avg_context_precision REAL,
    created_at REAL NOT NULL,
    completed_at REAL
);

CREATE TABLE IF NOT EXISTS cache_stats (
    id TEXT PRIMARY KEY,
    query_hash TEXT NOT NULL,
    hit_or_miss TEXT NOT NULL,
    saved_latency_ms REAL NOT NULL DEFAULT 0,
    created_at REAL NOT NULL
);
"#;
