//! HTTP and MCP surfaces
//!
//! The HTTP server exposes ingestion, retrieval, query (unary and SSE
//! streaming), evaluation, cache and tuning endpoints; every response
//! carries an `X-Response-Time` header. The MCP binary speaks JSON-RPC
//! 2.0 over stdio and exposes the same engine as tools.

pub mod error;
pub mod http;
pub mod mcp;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use http::create_router;
pub use state::AppState;
