//! MCP server — JSON-RPC 2.0 over stdio
//!
//! Exposes the engine as MCP tools: `rag_query`, `rag_retrieve`,
//! `rag_ingest_text`, `rag_collections`, `rag_metrics`. One request per
//! line on stdin, one response per line on stdout. Unknown methods get
//! `-32601`; unparseable lines get `-32700`.

use serde_json::{json, Value};

use rag_engine_ingest::ingest_text;
use rag_engine_pipeline::QueryOptions;

use crate::state::AppState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "rag-engine";

/// Handle one JSON-RPC request. `None` means no response (notification).
pub async fn handle_request(state: &AppState, request: Value) -> Option<Value> {
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    match method {
        "initialize" => Some(ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            }),
        )),
        "notifications/initialized" => None,
        "tools/list" => Some(ok(id, json!({ "tools": tool_definitions() }))),
        "tools/call" => {
            let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let result = call_tool(state, name, &arguments).await;
            Some(ok(
                id,
                json!({
                    "content": [{
                        "type": "text",
                        "text": serde_json::to_string_pretty(&result).unwrap_or_default(),
                    }]
                }),
            ))
        }
        other => Some(error(id, -32601, format!("Method not found: {}", other))),
    }
}

/// Error response for unparseable input.
pub fn parse_error() -> Value {
    error(Value::Null, -32700, "Parse error".to_string())
}

async fn call_tool(state: &AppState, name: &str, args: &Value) -> Value {
    match name {
        "rag_query" => tool_query(state, args).await,
        "rag_retrieve" => tool_retrieve(state, args).await,
        "rag_ingest_text" => tool_ingest_text(state, args).await,
        "rag_collections" => tool_collections(state).await,
        "rag_metrics" => tool_metrics(state, args).await,
        other => json!({ "error": format!("Unknown tool: {}", other) }),
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

async fn tool_query(state: &AppState, args: &Value) -> Value {
    let Some(query) = arg_str(args, "query") else {
        return json!({ "error": "Missing required argument: query" });
    };
    let collection = arg_str(args, "collection").unwrap_or("documents");

    let options = QueryOptions {
        top_k: Some(arg_usize(args, "top_k", 5)),
        model: arg_str(args, "model").map(str::to_string),
        evaluate: args
            .get("evaluate")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        lightweight_eval: state.settings.eval_lightweight,
        ..Default::default()
    };

    match state.pipeline.run(query, collection, options).await {
        Ok(result) => json!({
            "answer": result.answer,
            "sources": result.sources,
            "model": result.model,
            "tokens_used": result.tokens_used,
            "latency_ms": (result.latency_ms * 10.0).round() / 10.0,
            "cache_hit": result.cache_hit,
        }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn tool_retrieve(state: &AppState, args: &Value) -> Value {
    let Some(query) = arg_str(args, "query") else {
        return json!({ "error": "Missing required argument: query" });
    };
    let collection = arg_str(args, "collection").unwrap_or("documents");
    let top_k = arg_usize(args, "top_k", 5);
    let alpha = args.get("alpha").and_then(|v| v.as_f64());

    match state
        .pipeline
        .retrieve(query, collection, Some(top_k), alpha, None)
        .await
    {
        Ok(results) => {
            let chunks: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "text": r.text,
                        "score": (r.score as f64 * 10_000.0).round() / 10_000.0,
                        "source": r.metadata.get("source").and_then(|v| v.as_str()).unwrap_or(""),
                        "chunk_index": r.chunk_index,
                    })
                })
                .collect();
            json!({ "chunks": chunks, "count": chunks.len() })
        }
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn tool_ingest_text(state: &AppState, args: &Value) -> Value {
    let Some(text) = arg_str(args, "text") else {
        return json!({ "error": "Missing required argument: text" });
    };
    let collection = arg_str(args, "collection").unwrap_or("documents");
    let source = arg_str(args, "source").unwrap_or("mcp_input");

    match ingest_text(&state.ingest, &state.settings, text, collection, source).await {
        Ok(report) => serde_json::to_value(report).unwrap_or_default(),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn tool_collections(state: &AppState) -> Value {
    match state.store.collections().await {
        Ok(stats) => {
            let mut collections = Vec::with_capacity(stats.len());
            for stat in stats {
                let vectors_count = state.vector_store.points_count(&stat.collection).await;
                collections.push(json!({
                    "name": stat.collection,
                    "doc_count": stat.doc_count,
                    "total_chunks": stat.total_chunks,
                    "total_tokens": stat.total_tokens,
                    "vectors_count": vectors_count,
                }));
            }
            json!({ "collections": collections, "count": collections.len() })
        }
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn tool_metrics(state: &AppState, args: &Value) -> Value {
    let collection = arg_str(args, "collection");
    let limit = arg_usize(args, "limit", 50);

    match state.store.metrics(collection, limit).await {
        Ok(rows) => {
            if rows.is_empty() {
                return json!({ "total_queries": 0, "message": "No metrics data yet" });
            }
            let faithfulness: Vec<f64> = rows.iter().filter_map(|r| r.faithfulness).collect();
            let relevance: Vec<f64> = rows.iter().filter_map(|r| r.relevance).collect();
            let round3 =
                |values: &[f64]| -> Option<f64> {
                    if values.is_empty() {
                        None
                    } else {
                        Some(
                            (values.iter().sum::<f64>() / values.len() as f64 * 1000.0).round()
                                / 1000.0,
                        )
                    }
                };
            json!({
                "total_queries": rows.len(),
                "avg_faithfulness": round3(&faithfulness),
                "avg_relevance": round3(&relevance),
            })
        }
        Err(e) => json!({ "error": e.to_string() }),
    }
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "rag_query",
            "description": "Query documents using RAG with optional evaluation. Returns an answer grounded in your document collection with source citations.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The question to ask" },
                    "collection": { "type": "string", "description": "Document collection name", "default": "documents" },
                    "top_k": { "type": "integer", "description": "Number of chunks to retrieve", "default": 5 },
                    "model": { "type": "string", "description": "LLM model to use (optional)" },
                    "evaluate": { "type": "boolean", "description": "Run quality evaluation on the response", "default": false },
                },
                "required": ["query"],
            },
        },
        {
            "name": "rag_retrieve",
            "description": "Retrieve ranked document chunks using hybrid search (vector + BM25). Returns chunks sorted by relevance score.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "collection": { "type": "string", "description": "Collection to search", "default": "documents" },
                    "top_k": { "type": "integer", "description": "Number of results", "default": 5 },
                    "alpha": { "type": "number", "description": "Vector vs keyword weight (0=BM25, 1=vector)", "default": 0.7 },
                },
                "required": ["query"],
            },
        },
        {
            "name": "rag_ingest_text",
            "description": "Ingest raw text into a document collection. Chunks, embeds, and indexes the text for later retrieval.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text content to ingest" },
                    "collection": { "type": "string", "description": "Target collection", "default": "documents" },
                    "source": { "type": "string", "description": "Source name for the text", "default": "mcp_input" },
                },
                "required": ["text"],
            },
        },
        {
            "name": "rag_collections",
            "description": "List all document collections with their statistics (doc count, chunks, tokens, vectors).",
            "inputSchema": { "type": "object", "properties": {} },
        },
        {
            "name": "rag_metrics",
            "description": "Get evaluation metrics summary including average faithfulness and relevance scores.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "collection": { "type": "string", "description": "Filter by collection (optional)" },
                    "limit": { "type": "integer", "description": "Max queries to aggregate", "default": 50 },
                },
            },
        },
    ])
}

fn ok(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: Value, code: i64, message: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definitions_cover_the_five_tools() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "rag_query",
                "rag_retrieve",
                "rag_ingest_text",
                "rag_collections",
                "rag_metrics"
            ]
        );
    }

    #[test]
    fn error_responses_follow_jsonrpc() {
        let err = parse_error();
        assert_eq!(err["jsonrpc"], "2.0");
        assert_eq!(err["error"]["code"], -32700);

        let unknown = error(json!(3), -32601, "Method not found: nope".to_string());
        assert_eq!(unknown["id"], 3);
        assert_eq!(unknown["error"]["code"], -32601);
    }
}
