//! Wire messages for the control-server protocol.
//!
//! Every message is a JSON object in a single text frame, discriminated by
//! `type`. Field names on the wire are camelCase. Incoming messages are
//! parsed leniently: unknown types are reported as [`ServerMessage::Unknown`]
//! so the reader can log and move on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Fingerprint;

/// `register` — first frame after the socket opens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub machine_id: String,
    pub machine_name: String,
    pub os_type: String,
    pub os_version: String,
    pub arch: String,
    pub agent_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub fingerprint: Fingerprint,
    pub has_display: bool,
}

/// `heartbeat` — sent every interval once registered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub power_state: &'static str,
    pub is_screen_locked: bool,
    pub has_display: bool,
}

/// Server-pushed capability bits, latched from heartbeat acks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Permissions {
    pub master_mode: bool,
    pub file_transfer: bool,
    pub local_settings_locked: bool,
}

/// `registered` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default = "unknown_license")]
    pub license_status: String,
    #[serde(default)]
    pub config: Option<RegisteredConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredConfig {
    #[serde(default)]
    pub heartbeat_interval: Option<u64>,
}

/// `heartbeat_ack` payload. The update flag arrives as `u` or `updateFlag`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    #[serde(default = "unknown_license")]
    pub license_status: String,
    #[serde(default)]
    pub u: Option<u8>,
    #[serde(default)]
    pub update_flag: Option<u8>,
    #[serde(default)]
    pub default_browser: Option<String>,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

impl HeartbeatAck {
    /// 0 = none, 1 = optional update, 2 = forced update.
    pub fn effective_update_flag(&self) -> u8 {
        self.u.or(self.update_flag).unwrap_or(0)
    }
}

/// `request` — a server-issued method call, echoed back by id.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// `relay_response` — completion of an agent-minted relay call.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub result: Value,
}

fn unknown_license() -> String {
    "unknown".to_string()
}

/// Any message the server can push, discriminated by `type`.
#[derive(Debug)]
pub enum ServerMessage {
    Registered(Registered),
    HeartbeatAck(HeartbeatAck),
    Request(Request),
    RelayResponse(RelayResponse),
    /// Application-level ping; echo the timestamp in a pong.
    Ping {
        timestamp: Option<Value>,
    },
    Error {
        code: String,
        message: String,
    },
    /// Server config push — acknowledged silently.
    Config(Value),
    Unknown(String),
}

impl ServerMessage {
    /// Parse one frame. `Err` means the payload was not a JSON object or a
    /// known type failed to deserialize.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let msg_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let parsed = match msg_type.as_str() {
            "registered" => Self::Registered(
                serde_json::from_value(value).map_err(|e| e.to_string())?,
            ),
            "heartbeat_ack" => Self::HeartbeatAck(
                serde_json::from_value(value).map_err(|e| e.to_string())?,
            ),
            "request" => {
                Self::Request(serde_json::from_value(value).map_err(|e| e.to_string())?)
            }
            "relay_response" => Self::RelayResponse(
                serde_json::from_value(value).map_err(|e| e.to_string())?,
            ),
            "ping" => Self::Ping {
                timestamp: value.get("timestamp").cloned(),
            },
            "error" => Self::Error {
                code: value
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                message: value
                    .get("message")
                    .or_else(|| value.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
            },
            "config" => Self::Config(value),
            _ => Self::Unknown(msg_type),
        };
        Ok(parsed)
    }
}
