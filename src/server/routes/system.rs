//! System info, clipboard, and wait routes.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::Agent;

/// `GET /system/info`
pub async fn info(State(agent): State<Arc<Agent>>) -> Json<Value> {
    Json(agent.dispatcher.dispatch("system_info", &json!({})).await)
}

/// `GET /clipboard/read`
pub async fn clipboard_read(State(agent): State<Arc<Agent>>) -> Json<Value> {
    Json(
        agent
            .dispatcher
            .dispatch("clipboard_read", &json!({}))
            .await,
    )
}

/// `POST /clipboard/write`
pub async fn clipboard_write(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(agent.dispatcher.dispatch("clipboard_write", &body).await)
}

/// `POST /wait`
pub async fn wait(State(agent): State<Arc<Agent>>, Json(body): Json<Value>) -> Json<Value> {
    Json(agent.dispatcher.dispatch("wait", &body).await)
}
