//! Generic tool invocation: the loopback mirror of a server `request`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::Agent;

/// `POST /tool` — `{method, params}` forwarded to the dispatcher.
pub async fn tool(State(agent): State<Arc<Agent>>, Json(body): Json<Value>) -> Json<Value> {
    let method = body.get("method").and_then(Value::as_str).unwrap_or("");
    if method.is_empty() {
        return Json(json!({"success": false, "error": "method is required"}));
    }
    let params = body.get("params").cloned().unwrap_or_else(|| json!({}));
    Json(agent.dispatcher.dispatch(method, &params).await)
}
