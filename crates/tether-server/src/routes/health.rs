//! Liveness endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Engine-level health of the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` when activity is not being written back.
    pub status: String,
    pub version: String,
    /// Sessions held in the activity cache.
    pub cached_sessions: usize,
    /// Activity updates waiting for the next flush.
    pub pending_writes: usize,
    pub flush_running: bool,
}

/// `GET /health` (no auth required).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let sync = state.engine.synchronizer();
    let flush_running = sync.is_periodic_flush_running();

    Json(HealthResponse {
        status: if flush_running { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cached_sessions: state.engine.cache().len(),
        pending_writes: sync.pending_len(),
        flush_running,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
