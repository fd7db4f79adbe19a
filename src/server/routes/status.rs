//! Service status and fingerprint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::agent::{Agent, AGENT_VERSION};
use crate::identity;

/// `GET /status` — service-level snapshot.
pub async fn status(State(agent): State<Arc<Agent>>) -> Json<Value> {
    let control = agent.client.status();
    Json(json!({
        "service": "screencontrol",
        "version": AGENT_VERSION,
        "uptime_seconds": agent.uptime_seconds(),
        "machineId": agent.machine_id,
        "connected": control.connected,
        "agentId": control.agent_id,
        "licenseStatus": control.license_status,
        "permissions": control.permissions,
        "update": agent.updates.status_json(),
    }))
}

/// `GET /fingerprint` — identity facts for the installer and helper.
pub async fn fingerprint(State(agent): State<Arc<Agent>>) -> Json<Value> {
    let fp = identity::fingerprint();
    Json(json!({
        "machineId": agent.machine_id,
        "hostname": fp.hostname,
        "cpuModel": fp.cpu_model,
        "macAddresses": fp.mac_addresses,
        "platform": identity::platform_tag(),
        "arch": identity::arch_tag(),
        "osVersion": identity::os_version(),
    }))
}
