use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::AppState;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Prometheus scrape payload.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
