//! Local settings: a whitelist of fields the GUI helper may read and merge.
//!
//! The whitelist spans both persisted files: `agentName` and
//! `connectOnStartup` live in `connection.json`, `defaultBrowser` and
//! `httpPort` in `config.json`. Writes are refused while the server has
//! locked local settings.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::config::ConnectionConfig;

/// `GET /settings`
pub async fn get_settings(State(agent): State<Arc<Agent>>) -> Json<Value> {
    let connection = agent.client.connection_config().await;
    let stored = ConnectionConfig::load(&agent.config.lock().expect("config poisoned").connection_path())
        .unwrap_or(connection);
    let config = agent.config.lock().expect("config poisoned");
    Json(json!({
        "agentName": stored.agent_name,
        "connectOnStartup": stored.connect_on_startup,
        "defaultBrowser": config.default_browser,
        "httpPort": config.server.http_port,
        "localSettingsLocked": agent.client.permissions().local_settings_locked,
    }))
}

/// `POST /settings` — merge whitelisted fields and persist.
pub async fn post_settings(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    if agent.client.permissions().local_settings_locked {
        return Json(json!({"success": false, "error": "Local settings are locked"}));
    }

    let mut changed_connection = false;
    let connection_path = agent
        .config
        .lock()
        .expect("config poisoned")
        .connection_path();
    let mut connection = ConnectionConfig::load(&connection_path).unwrap_or_default();

    if let Some(name) = body.get("agentName").and_then(Value::as_str) {
        connection.agent_name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
        changed_connection = true;
    }
    if let Some(auto) = body.get("connectOnStartup").and_then(Value::as_bool) {
        connection.connect_on_startup = auto;
        changed_connection = true;
    }
    if changed_connection {
        if let Err(e) = connection.save(&connection_path) {
            return Json(json!({"success": false, "error": format!("Failed to save: {e}")}));
        }
    }

    let mut changed_config = false;
    {
        let mut config = agent.config.lock().expect("config poisoned");
        if let Some(browser) = body.get("defaultBrowser").and_then(Value::as_str) {
            config.default_browser = if browser.is_empty() {
                None
            } else {
                Some(browser.to_string())
            };
            changed_config = true;
        }
        if let Some(port) = body.get("httpPort").and_then(Value::as_u64) {
            if let Ok(port) = u16::try_from(port) {
                config.server.http_port = port;
                changed_config = true;
            }
        }
        if changed_config {
            if let Err(e) = config.save() {
                return Json(json!({"success": false, "error": format!("Failed to save: {e}")}));
            }
        }
    }

    Json(json!({"success": true}))
}
