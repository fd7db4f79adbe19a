//! Platform self-replacement: backup, installer script, rollback.
//!
//! The running binary can't overwrite itself, so installation writes a small
//! shell script that stops the service, extracts the archive, swaps the
//! binary at the canonical location, restarts the service, and cleans up —
//! restoring the backup if any step fails. The agent launches the script
//! detached and exits 0.

use std::path::{Path, PathBuf};

use tracing::info;

use super::UpdateInfo;

/// Service identifier used by systemd / launchd.
pub const SERVICE_NAME: &str = "screencontrol";

/// Archive layout: the tarball extracts to this subdirectory; a flat layout
/// is tolerated as fallback.
pub const ARCHIVE_SUBDIR: &str = "screencontrol";

/// Binary file name inside the archive.
pub const BINARY_NAME: &str = "screencontrol";

pub fn download_dir() -> PathBuf {
    std::env::temp_dir().join("screencontrol-update")
}

pub fn backup_dir() -> PathBuf {
    std::env::temp_dir().join("screencontrol-backup")
}

/// Platform config tree backed up alongside the binary.
#[cfg(target_os = "macos")]
pub fn config_dir() -> PathBuf {
    PathBuf::from("/Library/Application Support/ScreenControl")
}
#[cfg(not(target_os = "macos"))]
pub fn config_dir() -> PathBuf {
    PathBuf::from("/etc/screencontrol")
}

/// Build the installer script for this platform.
///
/// The script logs to `/tmp/screencontrol_update.log`, fails hard on any
/// step (`set -e` with an ERR trap that restores the backup), and removes
/// the download directory when done.
pub fn build_install_script(
    info: &UpdateInfo,
    download_path: &Path,
    install_dir: &Path,
) -> String {
    let download_dir = download_dir();
    let backup_dir = backup_dir();
    let stop_service;
    let start_service;
    #[cfg(target_os = "macos")]
    {
        let plist = format!("/Library/LaunchDaemons/com.{SERVICE_NAME}.service.plist");
        stop_service = format!("launchctl unload \"{plist}\" 2>/dev/null || true");
        start_service = format!("launchctl load \"{plist}\"");
    }
    #[cfg(not(target_os = "macos"))]
    {
        stop_service = format!(
            "if command -v systemctl >/dev/null 2>&1; then\n    \
             systemctl stop {SERVICE_NAME} 2>/dev/null || true\n\
             elif command -v service >/dev/null 2>&1; then\n    \
             service {SERVICE_NAME} stop 2>/dev/null || true\nfi"
        );
        start_service = format!(
            "if command -v systemctl >/dev/null 2>&1; then\n    \
             systemctl start {SERVICE_NAME}\n\
             elif command -v service >/dev/null 2>&1; then\n    \
             service {SERVICE_NAME} start\nfi"
        );
    }

    format!(
        r#"#!/bin/bash
# screencontrol update to v{version}
set -e

LOG_FILE="/tmp/screencontrol_update.log"
exec >> "$LOG_FILE" 2>&1

BACKUP_DIR="{backup}"
INSTALL_DIR="{install}"
DOWNLOAD_DIR="{download}"

rollback() {{
    echo "$(date): Install step failed, restoring backup"
    if [ -d "$BACKUP_DIR/install" ]; then
        cp -af "$BACKUP_DIR/install/." "$INSTALL_DIR/"
        echo "Rollback complete"
    fi
    {start_service_indented}
    exit 1
}}
trap rollback ERR

echo "$(date): Starting update to v{version}"

echo "Stopping service..."
{stop_service}
sleep 2

echo "Extracting update..."
cd "$DOWNLOAD_DIR"
tar -xzf "{artifact}"

echo "Installing new binary..."
EXTRACT_DIR="$DOWNLOAD_DIR/{subdir}"
if [ -f "$EXTRACT_DIR/{binary}" ]; then
    cp -f "$EXTRACT_DIR/{binary}" "$INSTALL_DIR/{binary}"
    chmod 755 "$INSTALL_DIR/{binary}"
    echo "Installed {binary}"
elif [ -f "$DOWNLOAD_DIR/{binary}" ]; then
    cp -f "$DOWNLOAD_DIR/{binary}" "$INSTALL_DIR/{binary}"
    chmod 755 "$INSTALL_DIR/{binary}"
    echo "Installed {binary} (flat layout)"
else
    echo "ERROR: {binary} not found in update package!"
    ls -la "$DOWNLOAD_DIR"
    false
fi

echo "Starting service..."
{start_service}

echo "Cleaning up..."
rm -rf "$DOWNLOAD_DIR"

echo "$(date): Update complete!"
"#,
        version = info.version,
        backup = backup_dir.display(),
        install = install_dir.display(),
        download = download_dir.display(),
        artifact = download_path.display(),
        subdir = ARCHIVE_SUBDIR,
        binary = BINARY_NAME,
        stop_service = stop_service,
        start_service = start_service,
        start_service_indented = start_service.replace('\n', "\n    "),
    )
}

/// Copy `src` into `dst` recursively (backup helper).
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Back up the installed tree and config, write the installer script, and
/// launch it detached. Success means the script now owns the update; the
/// caller exits the process.
pub async fn apply_update(
    info: &UpdateInfo,
    download_path: &Path,
    install_dir: &Path,
) -> Result<(), String> {
    let backup = backup_dir();

    info!("Creating backup in {}", backup.display());
    std::fs::create_dir_all(&backup).map_err(|e| format!("Failed to create backup dir: {e}"))?;
    if install_dir.exists() {
        copy_tree(install_dir, &backup.join("install"))
            .map_err(|e| format!("Failed to back up installation: {e}"))?;
    }
    let config = config_dir();
    if config.exists() {
        copy_tree(&config, &backup.join("config"))
            .map_err(|e| format!("Failed to back up configuration: {e}"))?;
    }

    let script_path = download_dir().join("update.sh");
    let script = build_install_script(info, download_path, install_dir);
    std::fs::write(&script_path, script).map_err(|e| format!("Failed to write script: {e}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| format!("Failed to chmod script: {e}"))?;
    }

    info!("Executing update script...");
    tokio::process::Command::new("/bin/bash")
        .arg(&script_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| format!("Failed to launch update script: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> UpdateInfo {
        UpdateInfo {
            version: "1.5.0".to_string(),
            filename: "screencontrol-1.5.0-linux-x64.tar.gz".to_string(),
            sha256: "aa".repeat(32),
            ..UpdateInfo::default()
        }
    }

    #[test]
    fn script_covers_the_install_steps() {
        let script = build_install_script(
            &sample_info(),
            &download_dir().join("screencontrol-1.5.0-linux-x64.tar.gz"),
            Path::new("/opt/screencontrol"),
        );
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("set -e"));
        assert!(script.contains("tar -xzf"));
        // subdirectory layout with flat fallback
        assert!(script.contains(&format!("$DOWNLOAD_DIR/{ARCHIVE_SUBDIR}")));
        assert!(script.contains("(flat layout)"));
        assert!(script.contains("chmod 755"));
        // failed install restores from backup
        assert!(script.contains("trap rollback ERR"));
        assert!(script.contains("cp -af \"$BACKUP_DIR/install/.\""));
        // cleanup
        assert!(script.contains("rm -rf \"$DOWNLOAD_DIR\""));
        assert!(script.contains("v1.5.0"));
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();
        std::fs::write(src.path().join("sub/b.txt"), "b").unwrap();

        let dst = tempfile::tempdir().unwrap();
        copy_tree(src.path(), &dst.path().join("copy")).unwrap();
        assert_eq!(
            std::fs::read_to_string(dst.path().join("copy/a.txt")).unwrap(),
            "a"
        );
        assert_eq!(
            std::fs::read_to_string(dst.path().join("copy/sub/b.txt")).unwrap(),
            "b"
        );
    }
}
