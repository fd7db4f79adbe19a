//! Control-server connection management.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::config::ConnectionConfig;

/// `GET /control-server/status`
pub async fn status(State(agent): State<Arc<Agent>>) -> Json<Value> {
    let snapshot = agent.client.status();
    Json(serde_json::to_value(snapshot).unwrap_or_else(|_| json!({"connected": false})))
}

/// `POST /control-server/connect` — body is a [`ConnectionConfig`].
pub async fn connect(
    State(agent): State<Arc<Agent>>,
    Json(config): Json<ConnectionConfig>,
) -> Json<Value> {
    if config.server_url.is_empty() {
        return Json(json!({"success": false, "error": "serverUrl is required"}));
    }
    match agent.connect(config).await {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => Json(json!({"success": false, "error": e})),
    }
}

/// `POST /control-server/disconnect`
pub async fn disconnect(State(agent): State<Arc<Agent>>) -> Json<Value> {
    agent.disconnect().await;
    Json(json!({"success": true}))
}

/// `POST /control-server/reconnect`
pub async fn reconnect(State(agent): State<Arc<Agent>>) -> Json<Value> {
    match agent.reconnect().await {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => Json(json!({"success": false, "error": e})),
    }
}
