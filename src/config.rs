//! Configuration loading and defaults.
//!
//! Two JSON files live in the service config directory (default
//! `/etc/screencontrol`, override with `SCREENCONTROL_CONFIG_DIR` or
//! `--config <path>`):
//!
//! - `config.json` — general settings (ports, shell defaults, update policy,
//!   command blocklist, logging level). Resolved in order of precedence:
//!   env vars > file > compiled defaults.
//! - `connection.json` — the control-server [`ConnectionConfig`]. Rewritten
//!   atomically (temp file + rename) whenever the operator changes it.
//!
//! ```json
//! {
//!   "server": { "host": "127.0.0.1", "httpPort": 3456 },
//!   "shell": { "defaultShell": "", "defaultWorkingDir": "" },
//!   "update": { "autoDownload": true, "autoInstall": false, "channel": "STABLE" },
//!   "logging": { "level": "info" }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util;

/// Top-level configuration, deserialized from `config.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub shell: ShellConfig,
    pub update: UpdateSettings,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    /// Browser preference pushed by the server in heartbeat acks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_browser: Option<String>,
    /// Directory this config was loaded from. Not persisted.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            shell: ShellConfig::default(),
            update: UpdateSettings::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            default_browser: None,
            dir: default_config_dir(),
        }
    }
}

/// Loopback HTTP server and companion-process port layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Bind host for the loopback API (default `127.0.0.1`).
    pub host: String,
    /// Main local API port (default 3456).
    pub http_port: u16,
    /// GUI helper bridge port (default 3460).
    pub gui_bridge_port: u16,
    /// Local WebSocket port reserved for the helper (default 3458).
    pub websocket_port: u16,
    /// Browser-extension bridge port on the GUI helper (default 3457).
    pub browser_bridge_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            http_port: 3456,
            gui_bridge_port: 3460,
            websocket_port: 3458,
            browser_bridge_port: 3457,
        }
    }
}

/// Shell defaults used when requests don't specify overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellConfig {
    /// Shell for sessions when the request names none. Empty means "probe
    /// bash, then sh".
    pub default_shell: String,
    /// Working directory for exec and sessions. Empty means inherit.
    pub default_working_dir: String,
    /// Default timeout for one-shot exec, seconds (default 30).
    pub exec_timeout_seconds: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_shell: String::new(),
            default_working_dir: String::new(),
            exec_timeout_seconds: 30,
        }
    }
}

/// Auto-update policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateSettings {
    /// Download as soon as a check reports an update (default true).
    pub auto_download: bool,
    /// Install as soon as a download verifies (default false; forced updates
    /// install regardless).
    pub auto_install: bool,
    /// Run a check every N heartbeats (default 60 ≈ 5 min at 5 s beats).
    pub check_interval_heartbeats: u32,
    /// Seconds to stay in FAILED before self-resetting to IDLE (default 600).
    pub failed_retry_timeout_seconds: u64,
    /// Release channel (default `STABLE`).
    pub channel: String,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            auto_download: true,
            auto_install: false,
            check_interval_heartbeats: 60,
            failed_retry_timeout_seconds: 600,
            channel: "STABLE".to_string(),
        }
    }
}

/// Command-filter policy for shell execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Regex patterns that block a command outright. Merged with the
    /// built-in list in [`crate::tools::filter`].
    pub blocked_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_patterns: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SCREENCONTROL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "macos")]
    {
        return PathBuf::from("/Library/Application Support/ScreenControl");
    }
    #[cfg(not(target_os = "macos"))]
    {
        PathBuf::from("/etc/screencontrol")
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure — a bad
    /// explicit config is a startup error). Otherwise looks for
    /// `config.json` in the config directory, falling back to defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            let mut c: Config = serde_json::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"));
            c.dir = Path::new(p)
                .parent()
                .map_or_else(default_config_dir, Path::to_path_buf);
            c
        } else {
            let dir = default_config_dir();
            let file = dir.join("config.json");
            match std::fs::read_to_string(&file) {
                Ok(content) => match serde_json::from_str::<Config>(&content) {
                    Ok(mut c) => {
                        c.dir = dir;
                        c
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring malformed {}: {e}", file.display());
                        Config {
                            dir,
                            ..Config::default()
                        }
                    }
                },
                Err(_) => Config {
                    dir,
                    ..Config::default()
                },
            }
        };

        if let Ok(port) = std::env::var("SCREENCONTROL_HTTP_PORT") {
            if let Ok(port) = port.parse() {
                config.server.http_port = port;
            }
        }
        if let Ok(host) = std::env::var("SCREENCONTROL_HTTP_HOST") {
            config.server.host = host;
        }

        config
    }

    /// Persist `config.json` atomically.
    pub fn save(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(self).expect("config serializes");
        util::atomic_write(&self.dir.join("config.json"), &body)
    }

    pub fn connection_path(&self) -> PathBuf {
        self.dir.join("connection.json")
    }
}

/// Control-server connection settings, persisted as `connection.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` URL of the control server.
    pub server_url: String,
    /// Bootstrap license identifier, if issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Operator-visible label for this agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Connect automatically when the service starts.
    pub connect_on_startup: bool,
}

impl ConnectionConfig {
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Atomic rewrite: write temp + rename.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let body = serde_json::to_vec_pretty(self).expect("connection config serializes");
        util::atomic_write(path, &body)
    }
}
