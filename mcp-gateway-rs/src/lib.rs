//! MCP tool-invocation gateway.
//!
//! Accepts JSON-RPC 2.0 `tools/call` requests over HTTP and runs each one
//! through a strictly ordered pipeline: per-caller rate limiting, bearer
//! auth, handler lookup, schema validation, then retried execution behind a
//! per-tool circuit breaker. Resilience primitives live in
//! `mcp-resilience-rs`; wire types in `mcp-types-rs`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use once_cell::sync::Lazy;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod rate_limit;
pub mod registry;
pub mod rpc;

pub use config::GatewayConfig;
pub use dispatcher::ToolDispatcher;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Shared application state behind every handler.
pub struct GatewayState {
    pub dispatcher: ToolDispatcher,
}

/// Builds the router: the JSON-RPC endpoint plus service plumbing.
pub fn build_router(state: Arc<GatewayState>, max_payload_bytes: usize) -> Router {
    let _ = *START_TIME;

    Router::new()
        .route("/", post(rpc::handle_rpc).get(root_handler))
        .route("/health", get(health_handler))
        .layer(RequestBodyLimitLayer::new(max_payload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "mcp-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST / (JSON-RPC 2.0: tools/call, tools/list)",
            "GET /health"
        ]
    }))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "healthy": true,
        "service_name": "mcp-gateway",
        "uptime_seconds": START_TIME.elapsed().as_secs(),
        "tools_registered": state.dispatcher.list_tools().len(),
    }))
}
