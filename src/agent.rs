//! The root `Agent` value: owns every service, wires the event stream, and
//! runs the reconnection supervisor.
//!
//! No singletons — the loopback server, the supervisor, and the event pump
//! all hold references into this one value.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Config, ConnectionConfig};
use crate::creds::CredentialStore;
use crate::dispatch::gui::LoopbackGuiProxy;
use crate::dispatch::Dispatcher;
use crate::identity;
use crate::protocol::{AgentEvent, AgentIdentity, CommandHandler, ControlClient};
use crate::shell::SessionManager;
use crate::tools::filter::CommandFilter;
use crate::tools::system::UnlockState;
use crate::update::{self, UpdateManager};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Derive the HTTP(S) base for update checks from a `ws://`/`wss://` URL:
/// scheme swapped, path dropped. Plain `http(s)` bases pass through.
pub fn http_base_from_ws(url: &str) -> String {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("wss://") {
        ("https://", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        ("http://", rest)
    } else {
        return url.trim_end_matches('/').to_string();
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    format!("{scheme}{authority}")
}

/// Everything the service is. One instance per host.
pub struct Agent {
    pub config: Arc<StdMutex<Config>>,
    pub client: ControlClient,
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: SessionManager,
    pub updates: UpdateManager,
    pub creds: Arc<CredentialStore>,
    pub unlock: Arc<UnlockState>,
    pub machine_id: String,
    pub start_time: Instant,
    connection_path: PathBuf,
    /// Set by an explicit disconnect; blocks the supervisor from redialling.
    user_disconnected: AtomicBool,
}

#[async_trait::async_trait]
impl CommandHandler for Dispatcher {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, String> {
        Ok(Dispatcher::dispatch(self, method, &params).await)
    }
}

impl Agent {
    pub fn new(config: Config) -> Arc<Self> {
        let machine_id = identity::machine_id(&config.dir);
        let connection_path = config.connection_path();
        let connection = ConnectionConfig::load(&connection_path).unwrap_or_default();

        let sessions = SessionManager::new();
        let creds = Arc::new(CredentialStore::new());
        let unlock = Arc::new(UnlockState::default());
        let filter = Arc::new(CommandFilter::new(&config.security.blocked_patterns));
        let gui = Arc::new(LoopbackGuiProxy::new(
            config.server.gui_bridge_port,
            config.server.browser_bridge_port,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone(),
            filter,
            Arc::clone(&creds),
            Arc::clone(&unlock),
            gui,
            config.shell.clone(),
            AGENT_VERSION.to_string(),
        ));

        let client = ControlClient::new(
            AgentIdentity {
                machine_id: machine_id.clone(),
                agent_version: AGENT_VERSION.to_string(),
            },
            Arc::clone(&dispatcher) as Arc<dyn CommandHandler>,
        );

        let updates = UpdateManager::new(update::UpdateConfig {
            server_url: http_base_from_ws(&connection.server_url),
            machine_id: machine_id.clone(),
            current_version: AGENT_VERSION.to_string(),
            platform: identity::platform_tag().to_string(),
            arch: identity::arch_tag().to_string(),
            channel: config.update.channel.clone(),
            auto_download: config.update.auto_download,
            auto_install: config.update.auto_install,
            check_interval_heartbeats: config.update.check_interval_heartbeats,
            failed_retry_timeout_seconds: config.update.failed_retry_timeout_seconds,
            install_dir: install_dir(),
        });

        Arc::new(Self {
            config: Arc::new(StdMutex::new(config)),
            client,
            dispatcher,
            sessions,
            updates,
            creds,
            unlock,
            machine_id,
            start_time: Instant::now(),
            connection_path,
            user_disconnected: AtomicBool::new(false),
        })
    }

    /// Spawn the event pump and the reconnection supervisor, and make the
    /// initial connection when configured to.
    pub fn start(self: &Arc<Self>) {
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.event_pump().await });

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let connection = agent.stored_connection();
            if connection.connect_on_startup && !connection.server_url.is_empty() {
                if let Err(e) = agent.connect(connection).await {
                    warn!("Startup connect failed: {e}");
                }
            }
            agent.supervise_reconnect().await;
        });
    }

    /// Forward protocol events to their consumers: update flags to the
    /// pipeline, browser preference to the config file.
    async fn event_pump(self: Arc<Self>) {
        let mut events = self.client.events();
        loop {
            match events.recv().await {
                Ok(AgentEvent::UpdateFlag(flag)) => self.updates.on_heartbeat(flag),
                Ok(AgentEvent::DefaultBrowser(browser)) => {
                    let mut config = self.config.lock().expect("config poisoned");
                    if config.default_browser.as_deref() != Some(browser.as_str()) {
                        info!("Updating default browser preference: {browser}");
                        config.default_browser = Some(browser);
                        if let Err(e) = config.save() {
                            warn!("Failed to persist config: {e}");
                        }
                    }
                }
                Ok(AgentEvent::Registered { agent_id, .. }) => {
                    info!("Registered with control server as {agent_id}");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event pump lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Reconnection supervisor: while connect-on-startup is set and the user
    /// has not explicitly disconnected, redial with exponential backoff
    /// (`min(5·2^attempts, 60)` seconds), resetting on success.
    async fn supervise_reconnect(self: Arc<Self>) {
        let mut attempts: u32 = 0;
        loop {
            let connection = self.client.connection_config().await;
            let should_run = {
                let stored = self.stored_connection();
                stored.connect_on_startup
                    && !self.user_disconnected.load(Ordering::SeqCst)
                    && !(connection.server_url.is_empty() && stored.server_url.is_empty())
            };

            if !should_run || self.client.is_connected() {
                attempts = 0;
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }

            let delay = 5u64.saturating_mul(1 << attempts.min(4)).min(60);
            tokio::time::sleep(Duration::from_secs(delay)).await;
            if self.client.is_connected() || self.user_disconnected.load(Ordering::SeqCst) {
                attempts = 0;
                continue;
            }

            let target = if connection.server_url.is_empty() {
                self.stored_connection()
            } else {
                connection
            };
            info!("Reconnecting to {} (attempt {})", target.server_url, attempts + 1);
            match self.client.connect(target).await {
                Ok(()) => attempts = 0,
                Err(e) => {
                    warn!("Reconnect failed: {e}");
                    attempts = attempts.saturating_add(1);
                }
            }
        }
    }

    fn stored_connection(&self) -> ConnectionConfig {
        ConnectionConfig::load(&self.connection_path).unwrap_or_default()
    }

    /// Connect with `config`, persisting it first (atomic rewrite).
    pub async fn connect(&self, config: ConnectionConfig) -> Result<(), String> {
        if let Err(e) = config.save(&self.connection_path) {
            warn!("Failed to persist connection config: {e}");
        }
        self.user_disconnected.store(false, Ordering::SeqCst);
        self.updates
            .set_server_url(http_base_from_ws(&config.server_url));
        self.client.connect(config).await.map_err(|e| e.to_string())
    }

    /// Explicit disconnect; the supervisor stays quiet until the next
    /// connect.
    pub async fn disconnect(&self) {
        self.user_disconnected.store(true, Ordering::SeqCst);
        self.client.disconnect().await;
    }

    pub async fn reconnect(&self) -> Result<(), String> {
        self.user_disconnected.store(false, Ordering::SeqCst);
        self.client.reconnect().await.map_err(|e| e.to_string())
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Graceful shutdown: supervisor tasks die with the runtime; this tears
    /// down the connection and the shell sessions in dependency order.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.sessions.shutdown_all().await;
    }
}

fn install_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/PrivilegedHelperTools")
    }
    #[cfg(not(target_os = "macos"))]
    {
        PathBuf::from("/opt/screencontrol")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_swaps_scheme_and_drops_path() {
        assert_eq!(
            http_base_from_ws("wss://control.example.com/agent/ws"),
            "https://control.example.com"
        );
        assert_eq!(
            http_base_from_ws("ws://10.0.0.5:3458/ws"),
            "http://10.0.0.5:3458"
        );
        assert_eq!(
            http_base_from_ws("https://updates.example.com/"),
            "https://updates.example.com"
        );
        assert_eq!(http_base_from_ws(""), "");
    }
}
