//! Host identity: machine id, hostname, OS version, CPU model, fingerprint.
//!
//! The machine id is the stable key the control server uses to recognise this
//! host across re-registrations. It comes from the OS machine GUID where one
//! exists; the fallback is a generated id persisted next to the config.

use std::path::Path;

use serde::Serialize;

use crate::util;

/// Platform tag sent in registration and update checks.
pub fn platform_tag() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macos",
        "windows" => "windows",
        _ => "linux",
    }
}

/// Architecture tag sent in registration and update checks.
pub fn arch_tag() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "x86",
        other => other,
    }
}

/// Hardware fingerprint embedded in the `register` message.
#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub hostname: String,
    #[serde(rename = "cpuModel")]
    pub cpu_model: String,
    #[serde(rename = "macAddresses")]
    pub mac_addresses: Vec<String>,
}

/// Resolve the stable machine id.
///
/// Linux reads `/etc/machine-id` (or the dbus copy); macOS asks `ioreg` for
/// the `IOPlatformUUID`. If neither yields an id, a random one is generated
/// and persisted to `machine-id` in `state_dir` so later runs agree.
pub fn machine_id(state_dir: &Path) -> String {
    #[cfg(target_os = "linux")]
    {
        for p in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(s) = std::fs::read_to_string(p) {
                let s = s.trim();
                if !s.is_empty() {
                    return s.to_string();
                }
            }
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(out) = std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
        {
            let text = String::from_utf8_lossy(&out.stdout);
            if let Some(line) = text.lines().find(|l| l.contains("IOPlatformUUID")) {
                if let Some(uuid) = line.split('"').nth(3) {
                    return uuid.to_string();
                }
            }
        }
    }

    let cached = state_dir.join("machine-id");
    if let Ok(s) = std::fs::read_to_string(&cached) {
        let s = s.trim();
        if !s.is_empty() {
            return s.to_string();
        }
    }
    let generated = util::random_hex_id("", 32);
    let _ = std::fs::create_dir_all(state_dir);
    let _ = util::atomic_write(&cached, generated.as_bytes());
    generated
}

pub fn hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            return name.to_string_lossy().into_owned();
        }
    }
    #[allow(unreachable_code)]
    "unknown".to_string()
}

/// Human-readable OS version string, e.g. `"Ubuntu 24.04.1 LTS"`.
pub fn os_version() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/etc/os-release") {
            for line in contents.lines() {
                if let Some(name) = line.strip_prefix("PRETTY_NAME=") {
                    return name.trim_matches('"').to_string();
                }
            }
        }
        "Linux".to_string()
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(out) = std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
        {
            let v = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if !v.is_empty() {
                return format!("macOS {v}");
            }
        }
        "macOS".to_string()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        std::env::consts::OS.to_string()
    }
}

pub fn cpu_model() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/proc/cpuinfo") {
            for line in contents.lines() {
                if line.starts_with("model name") {
                    if let Some((_, value)) = line.split_once(':') {
                        return value.trim().to_string();
                    }
                }
            }
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(out) = std::process::Command::new("sysctl")
            .args(["-n", "machdep.cpu.brand_string"])
            .output()
        {
            let v = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if !v.is_empty() {
                return v;
            }
        }
    }
    "Unknown CPU".to_string()
}

pub fn fingerprint() -> Fingerprint {
    Fingerprint {
        hostname: hostname(),
        cpu_model: cpu_model(),
        mac_addresses: vec!["service-mode".to_string()],
    }
}

/// Best-effort screen lock detection; used in heartbeats.
pub fn is_screen_locked() -> bool {
    #[cfg(target_os = "linux")]
    {
        if let Ok(out) = std::process::Command::new("pgrep")
            .args(["-x", "gnome-screensaver|xscreensaver|i3lock|swaylock"])
            .output()
        {
            return !out.stdout.is_empty();
        }
    }
    false
}

/// Whether a display is attached (headless-server detection).
pub fn has_display() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
    }
    #[cfg(target_os = "macos")]
    {
        true
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}
