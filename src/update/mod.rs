//! Auto-update pipeline: heartbeat-driven check, signed download, checksum
//! verification, platform self-replacement.
//!
//! State machine:
//! `IDLE → CHECKING → {UP_TO_DATE | AVAILABLE → DOWNLOADING → DOWNLOADED →
//! INSTALLING → (process exits)} | FAILED`, with `FAILED` self-resetting to
//! `IDLE` after a configurable timeout. One worker task at a time; the
//! pipeline never races itself.

pub mod install;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::util;

/// Runtime configuration assembled by the agent at startup.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// HTTP(S) base of the update endpoint, e.g. `https://control.example.com`.
    pub server_url: String,
    pub machine_id: String,
    pub current_version: String,
    pub platform: String,
    pub arch: String,
    pub channel: String,
    pub auto_download: bool,
    pub auto_install: bool,
    pub check_interval_heartbeats: u32,
    pub failed_retry_timeout_seconds: u64,
    /// Where the service binary lives (platform canonical location).
    pub install_dir: PathBuf,
}

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    Idle,
    Checking,
    Available,
    Downloading,
    Downloaded,
    Installing,
    Failed,
    UpToDate,
}

/// Manifest fields from a successful check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateInfo {
    pub version: String,
    pub channel: String,
    pub size: u64,
    pub sha256: String,
    pub filename: String,
    pub release_notes: String,
    pub download_url: String,
    pub is_forced: bool,
}

struct Shared {
    config: UpdateConfig,
    /// Update endpoint base; follows the control-server connection.
    server_url: StdMutex<String>,
    client: reqwest::Client,
    status: StdMutex<UpdateStatus>,
    failed_at: StdMutex<Option<Instant>>,
    info: StdMutex<Option<UpdateInfo>>,
    download_path: StdMutex<Option<PathBuf>>,
    heartbeat_count: AtomicU32,
    cancel: AtomicBool,
    downloaded: AtomicU64,
    total: AtomicU64,
    worker_busy: AtomicBool,
}

/// The update manager. Clone-cheap; one pipeline per agent.
#[derive(Clone)]
pub struct UpdateManager {
    shared: Arc<Shared>,
}

impl UpdateManager {
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                server_url: StdMutex::new(config.server_url.clone()),
                config,
                client: reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(30))
                    .build()
                    .expect("reqwest client builds"),
                status: StdMutex::new(UpdateStatus::Idle),
                failed_at: StdMutex::new(None),
                info: StdMutex::new(None),
                download_path: StdMutex::new(None),
                heartbeat_count: AtomicU32::new(0),
                cancel: AtomicBool::new(false),
                downloaded: AtomicU64::new(0),
                total: AtomicU64::new(0),
                worker_busy: AtomicBool::new(false),
            }),
        }
    }

    pub fn status(&self) -> UpdateStatus {
        *self.shared.status.lock().expect("update status poisoned")
    }

    /// Point the pipeline at a different update endpoint (set when the
    /// control-server connection changes).
    pub fn set_server_url(&self, url: String) {
        if !url.is_empty() {
            *self.shared.server_url.lock().expect("server url poisoned") = url;
        }
    }

    fn server_url(&self) -> String {
        self.shared
            .server_url
            .lock()
            .expect("server url poisoned")
            .clone()
    }

    pub fn update_info(&self) -> Option<UpdateInfo> {
        self.shared.info.lock().expect("update info poisoned").clone()
    }

    /// Download progress as 0-100.
    pub fn download_progress(&self) -> u8 {
        let total = self.shared.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        ((self.shared.downloaded.load(Ordering::Relaxed) * 100) / total).min(100) as u8
    }

    pub fn cancel_download(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
    }

    /// Heartbeat tick. Counts acks; every `check_interval_heartbeats` acks
    /// with a non-zero flag it kicks a check. A forced flag installs a
    /// verified download immediately. `FAILED` self-resets once the retry
    /// timeout has elapsed.
    pub fn on_heartbeat(&self, update_flag: u8) {
        let shared = &self.shared;
        let count = shared.heartbeat_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count < shared.config.check_interval_heartbeats {
            return;
        }
        shared.heartbeat_count.store(0, Ordering::SeqCst);

        if self.status() == UpdateStatus::Failed {
            let elapsed = shared
                .failed_at
                .lock()
                .expect("failed_at poisoned")
                .map_or(u64::MAX, |at| at.elapsed().as_secs());
            if elapsed >= shared.config.failed_retry_timeout_seconds {
                info!("Resetting from FAILED state after {elapsed}s timeout");
                self.set_status(UpdateStatus::Idle);
            }
        }

        if update_flag == 0 {
            return;
        }
        info!("Server signaled update available (flag={update_flag})");

        if update_flag == 2 && self.status() == UpdateStatus::Downloaded {
            info!("Forced update - applying immediately");
            let this = self.clone();
            tokio::spawn(async move { this.apply_update().await });
            return;
        }

        if matches!(self.status(), UpdateStatus::Idle | UpdateStatus::UpToDate) {
            self.check_for_update();
        }
    }

    /// Start a check on the worker. No-op while a check or download runs.
    pub fn check_for_update(&self) {
        if matches!(
            self.status(),
            UpdateStatus::Checking | UpdateStatus::Downloading | UpdateStatus::Installing
        ) {
            return;
        }
        if self.shared.worker_busy.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.check_task().await;
            this.shared.worker_busy.store(false, Ordering::SeqCst);
        });
    }

    async fn check_task(&self) {
        self.set_status(UpdateStatus::Checking);
        let config = &self.shared.config;
        let url = format!(
            "{}/api/updates/check?platform={}&arch={}&currentVersion={}&channel={}&machineId={}",
            self.server_url(),
            config.platform,
            config.arch,
            config.current_version,
            config.channel,
            config.machine_id,
        );

        let response = self
            .shared
            .client
            .get(&url)
            .header("X-Machine-Id", &config.machine_id)
            .send()
            .await;
        let body: Value = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    warn!("Failed to parse update response: {e}");
                    self.fail();
                    return;
                }
            },
            Ok(resp) => {
                warn!("Update check returned HTTP {}", resp.status());
                self.fail();
                return;
            }
            Err(e) => {
                warn!("Failed to check for updates: {e}");
                self.fail();
                return;
            }
        };

        if self.apply_check_response(&body) == UpdateStatus::Available
            && self.shared.config.auto_download
        {
            self.download_task().await;
        }
    }

    /// Interpret a check response and transition. Split out so the state
    /// machine is testable without a server.
    pub fn apply_check_response(&self, body: &Value) -> UpdateStatus {
        let available = body
            .get("updateAvailable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !available {
            let reason = body
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("up to date");
            info!("No update available: {reason}");
            self.set_status(UpdateStatus::UpToDate);
            return UpdateStatus::UpToDate;
        }

        let info: UpdateInfo = match serde_json::from_value(body.clone()) {
            Ok(i) => i,
            Err(e) => {
                warn!("Malformed update manifest: {e}");
                self.fail();
                return UpdateStatus::Failed;
            }
        };
        info!(
            "Update available: v{} ({} MB)",
            info.version,
            info.size / 1024 / 1024
        );
        *self.shared.info.lock().expect("update info poisoned") = Some(info);
        self.set_status(UpdateStatus::Available);
        UpdateStatus::Available
    }

    /// Kick the download on the worker (manual trigger; the check task runs
    /// it inline when `auto_download` is set).
    pub fn download_update(&self) {
        if self.status() != UpdateStatus::Available {
            return;
        }
        if self.shared.worker_busy.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.download_task().await;
            this.shared.worker_busy.store(false, Ordering::SeqCst);
        });
    }

    async fn download_task(&self) {
        let Some(info) = self.update_info() else {
            return;
        };
        self.set_status(UpdateStatus::Downloading);
        self.shared.cancel.store(false, Ordering::SeqCst);
        self.shared.downloaded.store(0, Ordering::Relaxed);
        self.shared.total.store(info.size, Ordering::Relaxed);

        let download_dir = install::download_dir();
        if let Err(e) = tokio::fs::create_dir_all(&download_dir).await {
            warn!("Failed to create download dir: {e}");
            self.fail();
            return;
        }
        let dest = download_dir.join(&info.filename);
        let url = format!("{}{}", self.server_url(), info.download_url);
        info!("Downloading from: {url}");

        match self.stream_download(&url, &dest).await {
            Ok(()) => {}
            Err(e) => {
                warn!("Download failed: {e}");
                self.fail();
                return;
            }
        }
        if self.shared.cancel.load(Ordering::SeqCst) {
            info!("Download cancelled");
            self.fail();
            return;
        }

        info!("Verifying checksum...");
        match verify_checksum(&dest, &info.sha256).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Checksum verification failed!");
                self.fail();
                return;
            }
            Err(e) => {
                warn!("Checksum verification error: {e}");
                self.fail();
                return;
            }
        }

        info!("Download complete and verified");
        *self
            .shared
            .download_path
            .lock()
            .expect("download path poisoned") = Some(dest);
        self.set_status(UpdateStatus::Downloaded);

        if self.shared.config.auto_install || info.is_forced {
            self.apply_update().await;
        }
    }

    async fn stream_download(&self, url: &str, dest: &std::path::Path) -> Result<(), String> {
        let config = &self.shared.config;
        let mut response = self
            .shared
            .client
            .get(url)
            .header("X-Machine-Id", &config.machine_id)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        if let Some(len) = response.content_length() {
            self.shared.total.store(len, Ordering::Relaxed);
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| e.to_string())?;
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            if self.shared.cancel.load(Ordering::SeqCst) {
                return Ok(());
            }
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            self.shared
                .downloaded
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
        file.flush().await.map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Install a verified download. On success the process exits so the
    /// installer script can replace the binary; on failure the pipeline
    /// lands in `FAILED` and the script's rollback restores the backup.
    pub async fn apply_update(&self) {
        if self.status() != UpdateStatus::Downloaded {
            warn!("Cannot apply update - not downloaded");
            return;
        }
        let (Some(info), Some(download_path)) = (
            self.update_info(),
            self.shared
                .download_path
                .lock()
                .expect("download path poisoned")
                .clone(),
        ) else {
            warn!("Cannot apply update - missing download");
            return;
        };

        info!("Applying update v{}...", info.version);
        self.set_status(UpdateStatus::Installing);

        match install::apply_update(&info, &download_path, &self.shared.config.install_dir).await {
            Ok(()) => {
                // The installer script owns the filesystem now; get out of
                // its way so the binary can be replaced.
                info!("Update script launched. Service will restart.");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                std::process::exit(0);
            }
            Err(e) => {
                warn!("Update installation failed: {e}");
                self.fail();
            }
        }
    }

    /// JSON snapshot for the loopback status endpoint.
    pub fn status_json(&self) -> Value {
        serde_json::json!({
            "status": self.status(),
            "progress": self.download_progress(),
            "info": self.update_info(),
        })
    }

    fn set_status(&self, status: UpdateStatus) {
        *self.shared.status.lock().expect("update status poisoned") = status;
        if status != UpdateStatus::Failed {
            *self.shared.failed_at.lock().expect("failed_at poisoned") = None;
        }
    }

    fn fail(&self) {
        *self.shared.status.lock().expect("update status poisoned") = UpdateStatus::Failed;
        *self.shared.failed_at.lock().expect("failed_at poisoned") = Some(Instant::now());
    }

    #[cfg(test)]
    fn force_failed_at(&self, at: Instant) {
        self.fail();
        *self.shared.failed_at.lock().expect("failed_at poisoned") = Some(at);
    }
}

/// Stream SHA-256 over the artifact (64 KiB blocks) and compare to the
/// server-declared digest, case-insensitively. An artifact is never executed
/// unless this returns `Ok(true)`.
pub async fn verify_checksum(
    path: &std::path::Path,
    expected_sha256: &str,
) -> std::io::Result<bool> {
    if expected_sha256.is_empty() {
        warn!("No checksum provided, refusing artifact");
        return Ok(false);
    }
    let actual = hash_file(path).await?;
    let matches = actual.eq_ignore_ascii_case(expected_sha256);
    if !matches {
        warn!("Checksum mismatch: expected {expected_sha256}, got {actual}");
    }
    Ok(matches)
}

/// SHA-256 of a whole file by streaming; lowercase hex.
pub async fn hash_file(path: &std::path::Path) -> std::io::Result<String> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(util::hex_encode(hasher.finalize()))
}
