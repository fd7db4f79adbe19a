//! Shell execution and session routes.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::Agent;

/// `POST /shell/exec`
pub async fn exec(State(agent): State<Arc<Agent>>, Json(body): Json<Value>) -> Json<Value> {
    Json(agent.dispatcher.dispatch("shell_exec", &body).await)
}

/// `GET /shell/session/list`
pub async fn list_sessions(State(agent): State<Arc<Agent>>) -> Json<Value> {
    Json(
        agent
            .dispatcher
            .dispatch("shell_list_sessions", &json!({}))
            .await,
    )
}

/// `POST /shell/session/start`
pub async fn start_session(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(
        agent
            .dispatcher
            .dispatch("shell_start_session", &body)
            .await,
    )
}

/// `POST /shell/session/input`
pub async fn send_input(State(agent): State<Arc<Agent>>, Json(body): Json<Value>) -> Json<Value> {
    Json(agent.dispatcher.dispatch("shell_send_input", &body).await)
}

/// `POST /shell/session/read`
pub async fn read_output(State(agent): State<Arc<Agent>>, Json(body): Json<Value>) -> Json<Value> {
    Json(agent.dispatcher.dispatch("shell_read_output", &body).await)
}

/// `POST /shell/session/stop`
pub async fn stop_session(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(
        agent
            .dispatcher
            .dispatch("shell_stop_session", &body)
            .await,
    )
}
