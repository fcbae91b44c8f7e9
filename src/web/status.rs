//! Health endpoint.

use axum::extract::State;
use axum::response::Json;
use serde_json::{Value, json};
use tracing::trace;

use crate::state::AppState;

/// `GET /api/health`
pub(super) async fn health(State(state): State<AppState>) -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GIT_COMMIT_SHORT"),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "cacheEntries": state.forecast.cache().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
