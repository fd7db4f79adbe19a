//! Protocol client — the agent's side of the control-server conversation.
//!
//! [`ControlClient`] owns the transport, a reader task, and a heartbeat task.
//! Lifecycle: `DISCONNECTED → CONNECTING → REGISTERED → (heartbeat loop)` and
//! back to `DISCONNECTED` on any transport error or explicit disconnect.
//! Reconnection policy lives outside, in the agent's supervisor.
//!
//! One typed [`AgentEvent`] stream replaces the callback registrations the
//! protocol grew up with: one publisher, any number of subscribers.

pub mod messages;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::identity;
use crate::transport::{Transport, TransportError};
use messages::{Heartbeat, HeartbeatAck, Register, Registered, Request, ServerMessage};

pub use messages::Permissions;

/// Heartbeat cadence when the server doesn't specify one.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Relay callbacks are released on response, disconnect, or this timeout.
const RELAY_TIMEOUT: Duration = Duration::from_secs(60);

/// Events published by the protocol client.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Transport connected / disconnected.
    Connected(bool),
    /// Registration acknowledged.
    Registered {
        agent_id: String,
        license_status: String,
    },
    /// The permission bits changed (emitted exactly once per change).
    PermissionsChanged(Permissions),
    /// Update flag from a heartbeat ack (0 none, 1 optional, 2 forced).
    /// Emitted on every ack so the update pipeline can count heartbeats.
    UpdateFlag(u8),
    /// Server pushed a browser preference.
    DefaultBrowser(String),
}

/// The command sink the client hands every server `request` to.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, String>;
}

/// Static identity facts sent during registration.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub machine_id: String,
    pub agent_version: String,
}

/// Latch for the three server-pushed permission bits.
///
/// `file_transfer` starts `false` and only ever reflects the last latched
/// ack; components read it through [`PermissionLatch::get`].
#[derive(Default)]
pub struct PermissionLatch {
    current: StdMutex<Permissions>,
}

impl PermissionLatch {
    /// Store `new` atomically. Returns whether anything changed.
    pub fn latch(&self, new: Permissions) -> bool {
        let mut cur = self.current.lock().expect("permission latch poisoned");
        if *cur == new {
            false
        } else {
            *cur = new;
            true
        }
    }

    pub fn get(&self) -> Permissions {
        *self.current.lock().expect("permission latch poisoned")
    }
}

/// Snapshot served by `GET /control-server/status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    #[serde(rename = "serverUrl")]
    pub server_url: String,
    #[serde(rename = "agentId")]
    pub agent_id: Option<String>,
    #[serde(rename = "licenseStatus")]
    pub license_status: String,
    pub permissions: Permissions,
}

struct Conn {
    transport: Option<Arc<Transport>>,
    config: ConnectionConfig,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

struct Shared {
    identity: AgentIdentity,
    handler: Arc<dyn CommandHandler>,
    events: broadcast::Sender<AgentEvent>,
    permissions: PermissionLatch,
    relays: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    conn: Mutex<Conn>,
    agent_id: StdMutex<Option<String>>,
    license_status: StdMutex<String>,
    server_url: StdMutex<String>,
    connected: AtomicBool,
}

/// The protocol client. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ControlClient {
    shared: Arc<Shared>,
}

impl ControlClient {
    pub fn new(identity: AgentIdentity, handler: Arc<dyn CommandHandler>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                identity,
                handler,
                events,
                permissions: PermissionLatch::default(),
                relays: Mutex::new(HashMap::new()),
                conn: Mutex::new(Conn {
                    transport: None,
                    config: ConnectionConfig::default(),
                    reader: None,
                    heartbeat: None,
                }),
                agent_id: StdMutex::new(None),
                license_status: StdMutex::new("unknown".to_string()),
                server_url: StdMutex::new(String::new()),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to the event stream.
    pub fn events(&self) -> broadcast::Receiver<AgentEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn permissions(&self) -> Permissions {
        self.shared.permissions.get()
    }

    pub fn agent_id(&self) -> Option<String> {
        self.shared.agent_id.lock().expect("agent id lock").clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.is_connected(),
            server_url: self.shared.server_url.lock().expect("url lock").clone(),
            agent_id: self.agent_id(),
            license_status: self
                .shared
                .license_status
                .lock()
                .expect("license lock")
                .clone(),
            permissions: self.shared.permissions.get(),
        }
    }

    /// Config the client last connected (or tried to connect) with.
    pub async fn connection_config(&self) -> ConnectionConfig {
        self.shared.conn.lock().await.config.clone()
    }

    /// Connect and register. No-op when already connected. Heartbeats start
    /// once the server acknowledges registration.
    pub async fn connect(&self, config: ConnectionConfig) -> Result<(), TransportError> {
        let mut conn = self.shared.conn.lock().await;
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        conn.config = config.clone();
        *self.shared.server_url.lock().expect("url lock") = config.server_url.clone();

        info!("Connecting to {}", config.server_url);
        let transport = Arc::new(Transport::connect(&config.server_url).await?);

        self.shared.connected.store(true, Ordering::SeqCst);
        let _ = self.shared.events.send(AgentEvent::Connected(true));

        // Registration goes out immediately on OPEN.
        let register = self.build_register(&config);
        let body = serde_json::to_string(&register).expect("register serializes");
        if let Err(e) = transport.send_text(&body).await {
            self.shared.connected.store(false, Ordering::SeqCst);
            let _ = self.shared.events.send(AgentEvent::Connected(false));
            return Err(e);
        }
        info!("→ REGISTER: {}", register.machine_name);

        let shared = Arc::clone(&self.shared);
        let reader_transport = Arc::clone(&transport);
        let reader = tokio::spawn(async move {
            loop {
                match reader_transport.recv().await {
                    Ok(text) => Shared::handle_message(&shared, &reader_transport, &text).await,
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        warn!("Transport error: {e}");
                        break;
                    }
                }
            }
            reader_transport.close().await;
            Shared::on_disconnect(&shared).await;
        });

        conn.transport = Some(transport);
        conn.reader = Some(reader);
        Ok(())
    }

    /// Close the connection. Idempotent. Joins the reader task so callers
    /// observe a fully-dismantled connection.
    pub async fn disconnect(&self) {
        let (transport, reader) = {
            let mut conn = self.shared.conn.lock().await;
            (conn.transport.take(), conn.reader.take())
        };
        if let Some(t) = transport {
            t.close().await;
        }
        if let Some(r) = reader {
            let _ = r.await;
        }
    }

    /// Disconnect, pause briefly, reconnect with the saved config.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let config = self.connection_config().await;
        self.disconnect().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.connect(config).await
    }

    /// Agent-to-agent call routed through the server. The completion handler
    /// is released on exactly one of: response, timeout, or disconnect.
    pub async fn relay(
        &self,
        target_agent_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, String> {
        let transport = {
            let conn = self.shared.conn.lock().await;
            conn.transport
                .clone()
                .ok_or_else(|| "Not connected to control server".to_string())?
        };

        let id = crate::util::random_hex_id("relay_", 16);
        let (tx, rx) = oneshot::channel();
        self.shared.relays.lock().await.insert(id.clone(), tx);

        let frame = json!({
            "type": "relay",
            "id": id,
            "targetAgentId": target_agent_id,
            "method": method,
            "params": params,
        });
        info!("→ RELAY: {method} -> {target_agent_id}");
        if let Err(e) = transport.send_text(&frame.to_string()).await {
            self.shared.relays.lock().await.remove(&id);
            return Err(format!("Relay send failed: {e}"));
        }

        match tokio::time::timeout(RELAY_TIMEOUT, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err("Connection lost before relay response".to_string()),
            Err(_) => {
                self.shared.relays.lock().await.remove(&id);
                Err("Relay timed out".to_string())
            }
        }
    }

    fn build_register(&self, config: &ConnectionConfig) -> Register {
        Register {
            msg_type: "register",
            machine_id: self.shared.identity.machine_id.clone(),
            machine_name: identity::hostname(),
            os_type: identity::platform_tag().to_string(),
            os_version: identity::os_version(),
            arch: identity::arch_tag().to_string(),
            agent_version: self.shared.identity.agent_version.clone(),
            agent_name: config.agent_name.clone(),
            license_uuid: config.endpoint_uuid.clone(),
            customer_id: config.customer_id.clone(),
            fingerprint: identity::fingerprint(),
            has_display: identity::has_display(),
        }
    }
}

impl Shared {
    async fn handle_message(shared: &Arc<Self>, transport: &Arc<Transport>, text: &str) {
        let msg = match ServerMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to parse message: {e}");
                return;
            }
        };

        match msg {
            ServerMessage::Registered(reg) => {
                Self::on_registered(shared, transport, reg);
            }
            ServerMessage::HeartbeatAck(ack) => Self::on_heartbeat_ack(shared, &ack),
            ServerMessage::Request(req) => Self::on_request(shared, transport, req),
            ServerMessage::RelayResponse(resp) => {
                if let Some(tx) = shared.relays.lock().await.remove(&resp.id) {
                    let _ = tx.send(resp.result);
                }
            }
            ServerMessage::Ping { timestamp } => {
                let mut pong = json!({"type": "pong"});
                if let Some(ts) = timestamp {
                    pong["timestamp"] = ts;
                }
                let _ = transport.send_text(&pong.to_string()).await;
            }
            ServerMessage::Error { code, message } => {
                warn!("← ERROR: code={code}, message={message}");
            }
            ServerMessage::Config(_) => {
                debug!("← config push acknowledged");
            }
            ServerMessage::Unknown(t) => {
                info!("← Unknown message type: {t}");
            }
        }
    }

    fn on_registered(shared: &Arc<Self>, transport: &Arc<Transport>, reg: Registered) {
        info!(
            "← REGISTERED: license={}, agentId={}",
            reg.license_status, reg.agent_id
        );
        *shared.agent_id.lock().expect("agent id lock") = Some(reg.agent_id.clone());
        *shared.license_status.lock().expect("license lock") = reg.license_status.clone();
        let _ = shared.events.send(AgentEvent::Registered {
            agent_id: reg.agent_id,
            license_status: reg.license_status,
        });

        let interval_ms = reg
            .config
            .and_then(|c| c.heartbeat_interval)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        Self::start_heartbeat(shared, transport, interval_ms);
    }

    /// Spawn the heartbeat task. Mid-connection interval changes are not
    /// supported; a second `registered` replaces the task wholesale.
    fn start_heartbeat(shared: &Arc<Self>, transport: &Arc<Transport>, interval_ms: u64) {
        let transport = Arc::clone(transport);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(50)));
            // The first tick fires immediately; skip it so beats start one
            // interval after registration.
            interval.tick().await;
            loop {
                interval.tick().await;
                let beat = Heartbeat {
                    msg_type: "heartbeat",
                    timestamp: now_ms(),
                    power_state: "ACTIVE",
                    is_screen_locked: identity::is_screen_locked(),
                    has_display: identity::has_display(),
                };
                let body = serde_json::to_string(&beat).expect("heartbeat serializes");
                if transport.send_text(&body).await.is_err() {
                    break;
                }
            }
        });

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let mut conn = shared.conn.lock().await;
            if let Some(old) = conn.heartbeat.replace(task) {
                old.abort();
            }
        });
    }

    fn on_heartbeat_ack(shared: &Arc<Self>, ack: &HeartbeatAck) {
        *shared.license_status.lock().expect("license lock") = ack.license_status.clone();

        if let Some(perms) = ack.permissions {
            if shared.permissions.latch(perms) {
                info!(
                    "Permissions updated: masterMode={}, fileTransfer={}, localSettingsLocked={}",
                    perms.master_mode, perms.file_transfer, perms.local_settings_locked
                );
                let _ = shared.events.send(AgentEvent::PermissionsChanged(perms));
            }
        }

        if let Some(browser) = ack.default_browser.clone() {
            if !browser.is_empty() {
                let _ = shared.events.send(AgentEvent::DefaultBrowser(browser));
            }
        }

        let _ = shared
            .events
            .send(AgentEvent::UpdateFlag(ack.effective_update_flag()));
    }

    /// Run the handler on its own task; the reader never blocks on command
    /// work. Responses are id-correlated, so completion order is free.
    fn on_request(shared: &Arc<Self>, transport: &Arc<Transport>, req: Request) {
        info!("← REQUEST: {}", req.method);
        let handler = Arc::clone(&shared.handler);
        let transport = Arc::clone(transport);
        tokio::spawn(async move {
            let reply = match handler.dispatch(&req.method, req.params).await {
                Ok(result) => json!({"type": "response", "id": req.id, "result": result}),
                Err(error) => json!({"type": "response", "id": req.id, "error": error}),
            };
            // If the connection died while the handler ran, the reply is
            // silently dropped.
            if let Err(e) = transport.send_text(&reply.to_string()).await {
                debug!("Dropped response for {}: {e}", req.id);
            }
        });
    }

    async fn on_disconnect(shared: &Arc<Self>) {
        if !shared.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Disconnected from control server");

        // Pending relay callbacks die with the connection.
        shared.relays.lock().await.clear();

        let mut conn = shared.conn.lock().await;
        if let Some(hb) = conn.heartbeat.take() {
            hb.abort();
        }
        conn.transport = None;
        drop(conn);

        let _ = shared.events.send(AgentEvent::Connected(false));
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_latch_reports_change_exactly_once() {
        let latch = PermissionLatch::default();
        assert_eq!(latch.get(), Permissions::default());

        let perms = Permissions {
            master_mode: true,
            file_transfer: false,
            local_settings_locked: false,
        };
        assert!(latch.latch(perms));
        // Identical ack: no change, no notification.
        assert!(!latch.latch(perms));
        assert_eq!(latch.get(), perms);

        let changed = Permissions {
            file_transfer: true,
            ..perms
        };
        assert!(latch.latch(changed));
        assert!(!latch.latch(changed));
    }

    #[test]
    fn file_transfer_defaults_to_false() {
        let latch = PermissionLatch::default();
        assert!(!latch.get().file_transfer);
    }
}
