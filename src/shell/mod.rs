//! Interactive shell sessions and one-shot command execution.
//!
//! [`SessionManager`] is the single owner of the session table. Sessions are
//! created PTY-backed (pipes are the fallback when PTY allocation fails),
//! identified by `session_<16 hex digits>`, and removed only by an explicit
//! stop or manager shutdown — a dead child keeps its record so the next
//! `send_input` or `read_output` surfaces the failure to the caller.
//!
//! The table mutex guards only map operations; all session I/O happens on
//! `Arc`-shared handles outside the lock.

pub mod process;
pub mod pty;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::util;
use session::{SessionKind, ShellSession};
use pty::{DEFAULT_COLS, DEFAULT_ROWS};

/// Map a symbolic signal name to its number. Numeric aliases from the wire
/// are accepted too; anything unrecognized falls back to SIGTERM.
pub fn parse_signal(name: &str) -> i32 {
    match name {
        "KILL" | "9" => libc::SIGKILL,
        "INT" | "2" => libc::SIGINT,
        "HUP" | "1" => libc::SIGHUP,
        _ => libc::SIGTERM,
    }
}

/// Snapshot row for `list_sessions`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionListItem {
    pub session_id: String,
    pub pid: u32,
}

/// Manages the pool of interactive shell sessions.
///
/// Cloneable — all clones share the same table.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, Arc<ShellSession>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an interactive session. `command` may be empty (probe for a
    /// shell), an alias like `bash`, or an explicit binary path. Returns
    /// `(session_id, pid)`.
    pub async fn start_session(
        &self,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<(String, u32), String> {
        let shell = pty::resolve_shell(command);
        let cwd = cwd.map(|c| util::expand_tilde(c).into_owned());
        let session_id = util::random_hex_id("session_", 16);

        let session = match pty::allocate_pty(DEFAULT_ROWS, DEFAULT_COLS) {
            Ok(pair) => {
                let child = pty::spawn_shell_pty(&pair, &shell, cwd.as_deref(), None)
                    .map_err(|e| format!("Failed to spawn shell: {e}"))?;
                ShellSession::spawn_pty(session_id.clone(), child, pair.master)?
            }
            Err(e) => {
                // No PTY available (containers, exhausted devpts) — fall
                // back to plain pipes.
                warn!("PTY allocation failed ({e}), falling back to pipes");
                let child = process::spawn_shell_pipes(&shell, cwd.as_deref(), None)
                    .map_err(|e| format!("Failed to spawn shell: {e}"))?;
                ShellSession::spawn_pipes(session_id.clone(), child)?
            }
        };

        let pid = session.pid;
        let kind = session.kind;
        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), Arc::new(session));
        info!("Session {session_id} started ({}, pid {pid})", kind.as_str());
        Ok((session_id, pid))
    }

    async fn get(&self, session_id: &str) -> Result<Arc<ShellSession>, String> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| format!("Session not found: {session_id}"))
    }

    /// Write bytes to the session's input channel. Returns bytes written.
    pub async fn send_input(&self, session_id: &str, input: &str) -> Result<usize, String> {
        let session = self.get(session_id).await?;
        session.write_stdin(input.as_bytes()).await
    }

    /// Non-blocking drain of accumulated output: `(stdout, stderr)`. PTY
    /// sessions merge everything into `stdout`.
    pub async fn read_output(&self, session_id: &str) -> Result<(String, String), String> {
        let session = self.get(session_id).await?;
        Ok(session.drain_output())
    }

    /// Stop a session and erase its record. The process group is signalled
    /// with the mapped signal (SIGKILL escalation after a short grace).
    pub async fn stop_session(&self, session_id: &str, signal: &str) -> Result<(), String> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| format!("Session not found: {session_id}"))?
        };
        session.stop(parse_signal(signal)).await;
        info!("Session {session_id} stopped (signal {signal})");
        Ok(())
    }

    /// Resize a PTY session's terminal.
    pub async fn resize_session(
        &self,
        session_id: &str,
        rows: u16,
        cols: u16,
    ) -> Result<(), String> {
        let session = self.get(session_id).await?;
        session.resize(rows, cols)
    }

    pub async fn list_sessions(&self) -> Vec<SessionListItem> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(id, s)| SessionListItem {
                session_id: id.clone(),
                pid: s.pid,
            })
            .collect()
    }

    pub async fn session_kind(&self, session_id: &str) -> Option<SessionKind> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.kind)
    }

    /// Kill every session (service shutdown). SIGTERM first, then the
    /// per-session KILL escalation.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<ShellSession>> =
            self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        if count == 0 {
            return;
        }
        for session in &sessions {
            session.stop(libc::SIGTERM).await;
        }
        info!("Shut down {count} session(s)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names_map_to_numbers() {
        assert_eq!(parse_signal("KILL"), libc::SIGKILL);
        assert_eq!(parse_signal("9"), libc::SIGKILL);
        assert_eq!(parse_signal("INT"), libc::SIGINT);
        assert_eq!(parse_signal("HUP"), libc::SIGHUP);
        assert_eq!(parse_signal("TERM"), libc::SIGTERM);
        assert_eq!(parse_signal("whatever"), libc::SIGTERM);
    }

    #[tokio::test]
    async fn missing_session_is_reported() {
        let mgr = SessionManager::new();
        let err = mgr.send_input("session_0000000000000000", "x").await.unwrap_err();
        assert!(err.starts_with("Session not found:"));
        let err = mgr.read_output("session_0000000000000000").await.unwrap_err();
        assert!(err.starts_with("Session not found:"));
        let err = mgr
            .stop_session("session_0000000000000000", "TERM")
            .await
            .unwrap_err();
        assert!(err.starts_with("Session not found:"));
    }

    #[tokio::test]
    async fn session_lifecycle_echo() {
        let mgr = SessionManager::new();
        let (id, pid) = mgr.start_session("sh", Some("/tmp")).await.unwrap();
        assert!(id.starts_with("session_"));
        assert!(pid > 0);

        // Listed while alive
        let listed = mgr.list_sessions().await;
        assert!(listed.iter().any(|s| s.session_id == id));

        let written = mgr.send_input(&id, "echo hello\n").await.unwrap();
        assert_eq!(written, "echo hello\n".len());

        // Poll-drain until the echo shows up.
        let mut combined = String::new();
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let (out, err) = mgr.read_output(&id).await.unwrap();
            combined.push_str(&out);
            combined.push_str(&err);
            if combined.contains("hello") {
                break;
            }
        }
        assert!(combined.contains("hello"), "expected echo output, got: {combined:?}");

        mgr.stop_session(&id, "TERM").await.unwrap();
        // Record is gone: every further call reports SessionNotFound.
        assert!(mgr.read_output(&id).await.is_err());
        assert!(mgr.list_sessions().await.iter().all(|s| s.session_id != id));
    }

    #[tokio::test]
    async fn dead_child_keeps_record_until_stop() {
        let mgr = SessionManager::new();
        let (id, _) = mgr.start_session("sh", None).await.unwrap();
        mgr.send_input(&id, "exit\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        // Child is gone but the record survives; read still succeeds and
        // drains whatever was buffered.
        assert!(mgr.read_output(&id).await.is_ok());
        assert!(mgr.list_sessions().await.iter().any(|s| s.session_id == id));

        mgr.stop_session(&id, "TERM").await.unwrap();
        assert!(mgr.read_output(&id).await.is_err());
    }
}
