//! Control-plane request handlers: health/version plus debug introspection
//! over the `Registry` (spec SPEC_FULL §3 "http control plane").

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;

use crate::registry::Registry;

/// Shared state behind the control-plane router.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn version_check() -> &'static str {
    concat!("live-origin v", env!("CARGO_PKG_VERSION"))
}

pub async fn debug_streams(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let streams = state.registry.snapshot();
    Json(serde_json::json!({
        "count": streams.len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "streams": streams,
    }))
}

pub async fn debug_stream_detail(
    State(state): State<Arc<AppState>>,
    Path(url): Path<String>,
) -> Json<serde_json::Value> {
    match state.registry.fetch(&url) {
        Some(source) => Json(serde_json::json!({
            "url": url,
            "source_id": source.source_id().to_string(),
            "is_publishing": source.is_publishing(),
            "consumer_count": source.consumer_count(),
        })),
        None => Json(serde_json::json!({ "error": "stream not found", "url": url })),
    }
}
