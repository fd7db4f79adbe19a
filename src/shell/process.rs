//! Low-level process spawning and one-shot command execution.
//!
//! [`exec_command`] runs `sh -c <command>` with a hard timeout, capturing
//! stdout and stderr separately. The child is put in its own process group
//! so a timeout can KILL the whole tree, and output captured before the
//! timeout is preserved in the error.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::warn;

/// Max captured bytes per stream (1 MiB). Output beyond this is still
/// drained from the pipe so the child never blocks, but discarded.
const MAX_EXEC_OUTPUT: usize = 1024 * 1024;

/// Spawn an interactive shell with piped stdio in its own process group.
///
/// `setpgid(0, 0)` in `pre_exec` makes the shell a group leader, so signals
/// sent to `-pgid` reach the whole process tree. The returned [`Child`] has
/// `kill_on_drop(true)`.
pub fn spawn_shell_pipes(
    shell: &str,
    working_dir: Option<&str>,
    env: Option<&HashMap<String, String>>,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(shell);
    cmd.arg("-i")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        if !dir.is_empty() {
            cmd.current_dir(dir);
        }
    }
    if let Some(vars) = env {
        cmd.envs(vars);
    }
    // SAFETY: setpgid is async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }
    cmd.spawn()
}

/// Successful result of [`exec_command`].
#[derive(Debug)]
pub struct ExecResult {
    /// Exit code, or `-1` when unavailable (e.g. killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Errors from [`exec_command`].
#[derive(Debug)]
pub enum ExecError {
    /// The shell could not be started.
    SpawnFailed(String),
    /// The child started but `wait()` failed.
    ProcessFailed(String),
    /// Timeout elapsed; carries whatever output was captured first.
    Timeout { stdout: String, stderr: String },
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::SpawnFailed(e) => write!(f, "Failed to spawn process: {e}"),
            ExecError::ProcessFailed(e) => write!(f, "Process error: {e}"),
            ExecError::Timeout { .. } => write!(f, "Command timed out"),
        }
    }
}

/// Execute `sh -c <command>` and capture output.
///
/// Stdout and stderr are read concurrently into shared buffers (avoiding
/// pipe deadlock, and keeping partial output reachable on timeout). When the
/// timeout elapses the process group gets SIGKILL.
pub async fn exec_command(
    command: &str,
    working_dir: Option<&str>,
    timeout_seconds: u64,
    env: Option<&HashMap<String, String>>,
) -> Result<ExecResult, ExecError> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        if !dir.is_empty() {
            cmd.current_dir(dir);
        }
    }
    if let Some(vars) = env {
        cmd.envs(vars);
    }
    // SAFETY: setpgid is async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;
    let pid = child.id().unwrap_or(0);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stdout pipe".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::ProcessFailed("Failed to take stderr pipe".to_string()))?;

    let stdout_buf = Arc::new(StdMutex::new(String::new()));
    let stderr_buf = Arc::new(StdMutex::new(String::new()));

    let out_task = tokio::spawn(read_capped(stdout, Arc::clone(&stdout_buf)));
    let err_task = tokio::spawn(read_capped(stderr, Arc::clone(&stderr_buf)));

    let timeout = std::time::Duration::from_secs(timeout_seconds);
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            // Let the readers drain whatever is left in the pipes.
            let _ = out_task.await;
            let _ = err_task.await;
            Ok(ExecResult {
                exit_code: status.code().unwrap_or(-1),
                stdout: take_buf(&stdout_buf),
                stderr: take_buf(&stderr_buf),
            })
        }
        Ok(Err(e)) => {
            out_task.abort();
            err_task.abort();
            Err(ExecError::ProcessFailed(e.to_string()))
        }
        Err(_) => {
            // KILL the whole process group, then reap.
            kill_group(pid, libc::SIGKILL);
            let _ = child.kill().await;
            out_task.abort();
            err_task.abort();
            warn!("Command timed out after {timeout_seconds}s: {command}");
            Err(ExecError::Timeout {
                stdout: take_buf(&stdout_buf),
                stderr: take_buf(&stderr_buf),
            })
        }
    }
}

/// Send `signal` to the process group led by `pid`.
pub fn kill_group(pid: u32, signal: i32) {
    #[allow(clippy::cast_possible_wrap)]
    let pgid = pid as i32;
    if pgid > 0 {
        // SAFETY: kill(-pgid, sig) is a plain syscall; errors are ignored
        // because the group may already be gone.
        unsafe {
            libc::kill(-pgid, signal);
        }
    }
}

/// Read from `reader` into `buf`, keeping the first [`MAX_EXEC_OUTPUT`]
/// bytes and draining (but discarding) the rest so the child never blocks on
/// a full pipe.
async fn read_capped(
    mut reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    buf: Arc<StdMutex<String>>,
) {
    let mut tmp = [0u8; 8192];
    let mut total = 0usize;
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total += n;
                let mut guard = buf.lock().expect("exec buffer poisoned");
                if guard.len() < MAX_EXEC_OUTPUT {
                    let take = n.min(MAX_EXEC_OUTPUT - guard.len());
                    guard.push_str(&String::from_utf8_lossy(&tmp[..take]));
                }
            }
        }
    }
    if total > MAX_EXEC_OUTPUT {
        let mut guard = buf.lock().expect("exec buffer poisoned");
        guard.push_str(&format!(
            "\n[truncated: {total} bytes total, showing first {MAX_EXEC_OUTPUT}]"
        ));
    }
}

fn take_buf(buf: &Arc<StdMutex<String>>) -> String {
    std::mem::take(&mut *buf.lock().expect("exec buffer poisoned"))
}
