//! System, clipboard, and machine-control tool handlers.
//!
//! All handlers return `{success, …}` JSON. Machine unlock is the one place
//! the credential store's internal retrieval is used on POSIX; on Windows
//! the service only owns an unlock-pending flag that the separately
//! installed credential provider polls over the loopback API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use serde_json::{json, Value};
use tracing::info;

use crate::creds::CredentialStore;
use crate::identity;

fn err(message: impl Into<String>) -> Value {
    json!({"success": false, "error": message.into()})
}

/// `system_info` — static facts plus a few live numbers.
pub fn system_info() -> Value {
    let mut info = json!({
        "success": true,
        "hostname": identity::hostname(),
        "platform": identity::platform_tag(),
        "arch": identity::arch_tag(),
        "os_version": identity::os_version(),
        "cpu_model": identity::cpu_model(),
    });

    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                let (key, target) = match line.split_once(':') {
                    Some(("MemTotal", rest)) => (rest, "memory_total_kb"),
                    Some(("MemAvailable", rest)) => (rest, "memory_available_kb"),
                    _ => continue,
                };
                if let Some(kb) = key.trim().strip_suffix(" kB").and_then(|v| v.parse::<u64>().ok())
                {
                    info[target] = json!(kb);
                }
            }
        }
        if let Ok(uptime) = std::fs::read_to_string("/proc/uptime") {
            if let Some(secs) = uptime
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
            {
                info["uptime_seconds"] = json!(secs as u64);
            }
        }
    }

    info
}

/// `machine_info` — system info plus service-level facts.
pub fn machine_info(agent_version: &str) -> Value {
    let mut info = system_info();
    info["isScreenLocked"] = json!(identity::is_screen_locked());
    info["serviceVersion"] = json!(agent_version);
    #[cfg(unix)]
    {
        info["serviceRunningAsRoot"] = json!(nix::unistd::geteuid().is_root());
    }
    info
}

/// Clipboard helpers shell out to the platform utilities; a desktop-less
/// host reports a tool-level error rather than crashing.
#[cfg(target_os = "macos")]
const PASTE_COMMANDS: &[&[&str]] = &[&["pbpaste"]];
#[cfg(target_os = "macos")]
const COPY_COMMANDS: &[&[&str]] = &[&["pbcopy"]];

#[cfg(not(target_os = "macos"))]
const PASTE_COMMANDS: &[&[&str]] = &[
    &["wl-paste", "--no-newline"],
    &["xclip", "-selection", "clipboard", "-o"],
    &["xsel", "--clipboard", "--output"],
];
#[cfg(not(target_os = "macos"))]
const COPY_COMMANDS: &[&[&str]] = &[
    &["wl-copy"],
    &["xclip", "-selection", "clipboard"],
    &["xsel", "--clipboard", "--input"],
];

pub async fn clipboard_read() -> Value {
    for cmd in PASTE_COMMANDS {
        let result = tokio::process::Command::new(cmd[0])
            .args(&cmd[1..])
            .output()
            .await;
        if let Ok(out) = result {
            if out.status.success() {
                return json!({
                    "success": true,
                    "text": String::from_utf8_lossy(&out.stdout),
                });
            }
        }
    }
    err("No clipboard utility available")
}

pub async fn clipboard_write(text: &str) -> Value {
    use tokio::io::AsyncWriteExt;
    for cmd in COPY_COMMANDS {
        let child = tokio::process::Command::new(cmd[0])
            .args(&cmd[1..])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
        if let Ok(mut child) = child {
            if let Some(mut stdin) = child.stdin.take() {
                if stdin.write_all(text.as_bytes()).await.is_ok() {
                    drop(stdin);
                    if matches!(child.wait().await, Ok(s) if s.success()) {
                        return json!({"success": true, "bytes_written": text.len()});
                    }
                }
            }
        }
    }
    err("No clipboard utility available")
}

/// `wait` — sleep for the requested duration.
pub async fn wait(milliseconds: u64) -> Value {
    if milliseconds > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(milliseconds)).await;
    }
    json!({"success": true, "waited_ms": milliseconds})
}

/// Machine-unlock coordination state. On Windows the credential provider
/// polls the pending flag through the loopback API; the service itself only
/// owns the flag and the last reported result.
#[derive(Default)]
pub struct UnlockState {
    pending: AtomicBool,
    last_result: StdMutex<Option<String>>,
}

impl UnlockState {
    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Record the outcome reported by the credential provider and clear the
    /// pending flag.
    pub fn report_result(&self, success: bool, error: Option<String>) {
        self.pending.store(false, Ordering::SeqCst);
        *self.last_result.lock().expect("unlock state poisoned") = if success {
            None
        } else {
            Some(error.unwrap_or_else(|| "Unlock failed".to_string()))
        };
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_result
            .lock()
            .expect("unlock state poisoned")
            .clone()
    }
}

/// `machine_lock` — lock the workstation.
pub async fn machine_lock() -> Value {
    #[cfg(target_os = "macos")]
    let candidates: &[&str] = &[
        "/System/Library/CoreServices/Menu\\ Extras/User.menu/Contents/Resources/CGSession -suspend",
    ];
    #[cfg(target_os = "linux")]
    let candidates: &[&str] = &[
        "loginctl lock-session",
        "xdg-screensaver lock",
        "gnome-screensaver-command -l",
    ];
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    let candidates: &[&str] = &[];

    for cmd in candidates {
        let status = tokio::process::Command::new("/bin/sh")
            .args(["-c", cmd])
            .status()
            .await;
        if matches!(status, Ok(s) if s.success()) {
            info!("Machine locked");
            return json!({"success": true, "message": "Machine locked"});
        }
    }
    err("Failed to lock machine")
}

/// `machine_unlock` — platform-gated unlock.
///
/// macOS wakes the display and types the credentials through System Events;
/// the username and password come from the request or, failing that, the
/// credential store. Windows sets the unlock-pending flag for the credential
/// provider. Linux has no unlock path.
pub async fn machine_unlock(
    username: Option<&str>,
    password: Option<&str>,
    creds: &CredentialStore,
    unlock: &UnlockState,
) -> Value {
    #[cfg(target_os = "macos")]
    {
        let stored = if password.is_none() {
            creds.unlock_credentials_internal()
        } else {
            None
        };
        let password = match password.map(ToString::to_string).or_else(|| {
            stored.as_ref().map(|(_, p)| p.clone())
        }) {
            Some(p) if !p.is_empty() => p,
            _ => return err("Password is required for unlock"),
        };
        let username = username
            .map(ToString::to_string)
            .or_else(|| stored.map(|(u, _)| u))
            .unwrap_or_default();
        let _ = username; // System Events types into the session of the console user

        // Wake the display before typing.
        let _ = tokio::process::Command::new("caffeinate")
            .args(["-u", "-t", "1"])
            .status()
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        let script = format!(
            "tell application \"System Events\" to keystroke \"{}\"\n\
             tell application \"System Events\" to keystroke return",
            password.replace('\\', "\\\\").replace('"', "\\\"")
        );
        let status = tokio::process::Command::new("osascript")
            .args(["-e", &script])
            .status()
            .await;
        return match status {
            Ok(s) if s.success() => {
                info!("Machine unlock command sent");
                json!({"success": true, "message": "Unlock command sent"})
            }
            _ => err("Unlock command failed"),
        };
    }
    #[cfg(target_os = "windows")]
    {
        let _ = (username, password);
        if !creds.has_unlock_credentials() {
            return err("No stored credentials - please store credentials first");
        }
        unlock.set_pending(true);
        info!("Unlock pending flag set - waiting for credential provider");
        return json!({"success": true, "message": "Unlock initiated via Credential Provider"});
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let _ = (username, password, creds, unlock);
        err("Unlock not supported on this platform")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_info_reports_platform_tag() {
        let info = system_info();
        assert_eq!(info["success"], true);
        assert_eq!(info["platform"], identity::platform_tag());
        assert!(!info["hostname"].as_str().unwrap().is_empty());
    }

    #[test]
    fn machine_info_adds_service_facts() {
        let info = machine_info("1.4.0");
        assert_eq!(info["serviceVersion"], "1.4.0");
        assert!(info.get("isScreenLocked").is_some());
        assert!(info.get("serviceRunningAsRoot").is_some());
    }

    #[tokio::test]
    async fn wait_reports_duration() {
        let started = std::time::Instant::now();
        let v = wait(30).await;
        assert_eq!(v["success"], true);
        assert_eq!(v["waited_ms"], 30);
        assert!(started.elapsed().as_millis() >= 30);
    }

    #[test]
    fn unlock_state_latches_results() {
        let state = UnlockState::default();
        assert!(!state.is_pending());

        state.set_pending(true);
        assert!(state.is_pending());

        state.report_result(false, Some("wrong password".to_string()));
        assert!(!state.is_pending());
        assert_eq!(state.last_error().as_deref(), Some("wrong password"));

        state.report_result(true, None);
        assert_eq!(state.last_error(), None);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn unlock_is_unsupported_on_linux() {
        let creds = CredentialStore::with_service("screencontrol-test");
        let unlock = UnlockState::default();
        let v = machine_unlock(None, Some("pw"), &creds, &unlock).await;
        assert_eq!(v["success"], false);
    }
}
