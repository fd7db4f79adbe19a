//! Screen-stream control endpoints.
//!
//! Capture itself lives in the GUI helper; these routes forward when the
//! helper is reachable and report unavailability otherwise.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::Agent;

async fn forward(agent: &Agent, method: &str, params: Value) -> Json<Value> {
    match agent.dispatcher.gui().call(method, params).await {
        Ok(result) => Json(result),
        Err(_) => Json(json!({"success": false, "error": "screen streaming unavailable"})),
    }
}

/// `POST /screen/stream/start`
pub async fn stream_start(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    forward(&agent, "screen_stream_start", body).await
}

/// `POST /screen/stream/stop`
pub async fn stream_stop(State(agent): State<Arc<Agent>>, Json(body): Json<Value>) -> Json<Value> {
    forward(&agent, "screen_stream_stop", body).await
}

/// `POST /screen/stream/refresh`
pub async fn stream_refresh(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    forward(&agent, "screen_stream_refresh", body).await
}

/// `GET /screen/stream/stats`
pub async fn stream_stats(State(agent): State<Arc<Agent>>) -> Json<Value> {
    forward(&agent, "screen_stream_stats", json!({})).await
}
