//! Liveness probe.

use serde_json::{json, Value};

use axum::Json;

/// `GET /health` — unauthenticated, loopback-only by binding.
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "screencontrol"}))
}
