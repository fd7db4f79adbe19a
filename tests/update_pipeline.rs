//! Update pipeline against a mock update server: manifest check, streaming
//! download, checksum gate.

use std::path::PathBuf;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use screencontrol::update::{install, UpdateConfig, UpdateManager, UpdateStatus};

const ARTIFACT_GOOD: &[u8] = b"pretend this is a tarball";

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Serve a manifest advertising `sha256` and an artifact with `body`.
async fn start_update_server(sha256: String, body: &'static [u8], filename: &str) -> String {
    let filename = filename.to_string();
    let manifest = move || {
        let filename = filename.clone();
        let sha256 = sha256.clone();
        async move {
            Json(json!({
                "updateAvailable": true,
                "version": "9.9.9",
                "channel": "STABLE",
                "size": body.len(),
                "sha256": sha256,
                "filename": filename,
                "releaseNotes": "test build",
                "downloadUrl": "/api/updates/download",
                "isForced": false,
            }))
        }
    };
    let app = Router::new()
        .route("/api/updates/check", get(manifest))
        .route("/api/updates/download", get(move || async move { body }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{addr}")
}

fn manager(server_url: String) -> UpdateManager {
    UpdateManager::new(UpdateConfig {
        server_url,
        machine_id: "machine-1".to_string(),
        current_version: "1.4.0".to_string(),
        platform: "linux".to_string(),
        arch: "x64".to_string(),
        channel: "STABLE".to_string(),
        auto_download: true,
        auto_install: false,
        check_interval_heartbeats: 1,
        failed_retry_timeout_seconds: 600,
        install_dir: PathBuf::from("/opt/screencontrol"),
    })
}

async fn wait_for_terminal(m: &UpdateManager) -> UpdateStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = m.status();
        if matches!(
            status,
            UpdateStatus::Downloaded | UpdateStatus::Failed | UpdateStatus::UpToDate
        ) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline stuck in {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn verified_download_lands_in_downloaded() {
    let base = start_update_server(
        sha256_hex(ARTIFACT_GOOD),
        ARTIFACT_GOOD,
        "update-ok.tar.gz",
    )
    .await;
    let m = manager(base);

    m.check_for_update();
    assert_eq!(wait_for_terminal(&m).await, UpdateStatus::Downloaded);

    let info = m.update_info().unwrap();
    assert_eq!(info.version, "9.9.9");
    let artifact = install::download_dir().join("update-ok.tar.gz");
    assert_eq!(std::fs::read(&artifact).unwrap(), ARTIFACT_GOOD);
    let _ = std::fs::remove_file(artifact);
}

#[tokio::test]
async fn checksum_mismatch_fails_and_never_installs() {
    // Manifest declares a digest the artifact will not hash to.
    let base = start_update_server("aa".repeat(32), ARTIFACT_GOOD, "update-bad.tar.gz").await;
    let m = manager(base);

    m.check_for_update();
    assert_eq!(wait_for_terminal(&m).await, UpdateStatus::Failed);

    // No installer script was generated for the failed artifact.
    assert!(!install::download_dir().join("update.sh").exists());
    let _ = std::fs::remove_file(install::download_dir().join("update-bad.tar.gz"));
}

#[tokio::test]
async fn up_to_date_manifest_short_circuits() {
    let app = Router::new().route(
        "/api/updates/check",
        get(|| async {
            Json(json!({"updateAvailable": false, "reason": "latest version"}))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let m = manager(format!("http://{addr}"));
    m.check_for_update();
    assert_eq!(wait_for_terminal(&m).await, UpdateStatus::UpToDate);
    assert!(m.update_info().is_none());
}

#[tokio::test]
async fn unreachable_server_fails_the_check() {
    let m = manager("http://127.0.0.1:1".to_string());
    m.check_for_update();
    assert_eq!(wait_for_terminal(&m).await, UpdateStatus::Failed);
}

#[tokio::test]
async fn manifest_fields_deserialize() {
    // Guard the wire contract: camelCase manifest into UpdateInfo.
    let body: Value = json!({
        "updateAvailable": true,
        "version": "2.0.0",
        "channel": "BETA",
        "size": 123,
        "sha256": "ff",
        "filename": "f.tar.gz",
        "releaseNotes": "notes",
        "downloadUrl": "/d",
        "isForced": true,
    });
    let info: screencontrol::update::UpdateInfo = serde_json::from_value(body).unwrap();
    assert_eq!(info.channel, "BETA");
    assert_eq!(info.download_url, "/d");
    assert!(info.is_forced);
}
