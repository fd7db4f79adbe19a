//! Machine unlock and credential-provider endpoints.
//!
//! Credential storage is write-only from this surface; retrieval exists
//! solely for the Windows credential provider, which talks to these
//! loopback-gated endpoints. Off Windows the provider endpoints answer with
//! a platform error (still HTTP 200).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::Agent;

/// `POST /unlock` — trigger a machine unlock.
pub async fn unlock(State(agent): State<Arc<Agent>>, Json(body): Json<Value>) -> Json<Value> {
    Json(agent.dispatcher.dispatch("machine_unlock", &body).await)
}

/// `POST /unlock/credentials` — store unlock credentials (write-only).
pub async fn store_credentials(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let username = body.get("username").and_then(Value::as_str).unwrap_or("");
    let password = body.get("password").and_then(Value::as_str).unwrap_or("");
    if username.is_empty() || password.is_empty() {
        return Json(json!({"success": false, "error": "username and password are required"}));
    }
    let stored = agent.creds.store_unlock_credentials(username, password);
    if stored {
        Json(json!({"success": true}))
    } else {
        Json(json!({"success": false, "error": "Failed to store credentials"}))
    }
}

/// `DELETE /unlock/credentials` — clearing is always allowed.
pub async fn clear_credentials(State(agent): State<Arc<Agent>>) -> Json<Value> {
    let cleared = agent.creds.clear_unlock_credentials();
    Json(json!({"success": cleared}))
}

/// `GET /unlock/status`
pub async fn status(State(agent): State<Arc<Agent>>) -> Json<Value> {
    Json(json!({
        "hasCredentials": agent.creds.has_unlock_credentials(),
        "unlockPending": agent.unlock.is_pending(),
        "lastError": agent.unlock.last_error(),
        "platformSupported": cfg!(any(target_os = "macos", target_os = "windows")),
    }))
}

#[cfg(not(target_os = "windows"))]
fn provider_unsupported() -> Json<Value> {
    Json(json!({
        "success": false,
        "error": "Credential provider not supported on this platform",
    }))
}

/// `GET /credential-provider/unlock` — the provider polls this flag.
pub async fn provider_unlock(State(agent): State<Arc<Agent>>) -> Json<Value> {
    #[cfg(target_os = "windows")]
    {
        return Json(json!({"unlockPending": agent.unlock.is_pending()}));
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = agent;
        provider_unsupported()
    }
}

/// `GET /credential-provider/credentials` — internal-use retrieval, gated to
/// localhost by the server binding and to Windows by this cfg.
pub async fn provider_credentials(State(agent): State<Arc<Agent>>) -> Json<Value> {
    #[cfg(target_os = "windows")]
    {
        return match agent.creds.unlock_credentials_internal() {
            Some((username, password)) => Json(json!({
                "success": true,
                "username": username,
                "password": password,
            })),
            None => Json(json!({"success": false, "error": "No stored credentials"})),
        };
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = agent;
        provider_unsupported()
    }
}

/// `POST /credential-provider/result` — provider reports the unlock outcome.
pub async fn provider_result(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    #[cfg(target_os = "windows")]
    {
        let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        agent.unlock.report_result(success, error);
        return Json(json!({"success": true}));
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = (agent, body);
        provider_unsupported()
    }
}

/// `GET /credential-provider/status`
pub async fn provider_status(State(agent): State<Arc<Agent>>) -> Json<Value> {
    #[cfg(target_os = "windows")]
    {
        return Json(json!({
            "unlockPending": agent.unlock.is_pending(),
            "lastError": agent.unlock.last_error(),
        }));
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = agent;
        provider_unsupported()
    }
}
