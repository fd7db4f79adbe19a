//! A single interactive shell session, PTY- or pipe-backed.
//!
//! Background reader tasks drain the child's output into in-memory buffers,
//! so [`ShellSession::drain_output`] returns instantly with whatever has
//! accumulated — the non-blocking contract the protocol's poll-style
//! `read_output` relies on. A dead child does not tear the session down;
//! the record stays until an explicit stop, and the buffers keep whatever
//! the child wrote before exiting.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::process::kill_group;
use super::pty;

/// Backing channel discriminator: a PTY merges stdout and stderr, pipes keep
/// them separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Pty,
    Pipes,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pty => "pty",
            Self::Pipes => "pipes",
        }
    }
}

/// A running (or exited but not yet stopped) shell session.
pub struct ShellSession {
    pub id: String,
    pub pid: u32,
    pub kind: SessionKind,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    stdout_buf: Arc<StdMutex<String>>,
    stderr_buf: Arc<StdMutex<String>>,
    running: Arc<AtomicBool>,
    exit_code: Arc<StdMutex<Option<i32>>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    /// Kept alive for resize on PTY sessions.
    pty_master: Option<OwnedFd>,
}

impl ShellSession {
    /// Wrap a PTY-backed child. Output is one merged stream read from the
    /// master fd; the session owns the master for its whole lifetime.
    pub fn spawn_pty(id: String, mut child: Child, master: OwnedFd) -> Result<Self, String> {
        let pid = child.id().unwrap_or(0);

        let stdout_buf = Arc::new(StdMutex::new(String::new()));
        let stderr_buf = Arc::new(StdMutex::new(String::new()));
        let running = Arc::new(AtomicBool::new(true));
        let exit_code: Arc<StdMutex<Option<i32>>> = Arc::new(StdMutex::new(None));

        let master_raw: RawFd = master.as_raw_fd();

        // Independent dups: one for the writer task, one for the reader task.
        // SAFETY: dup returns fds we own; they are wrapped immediately.
        let writer_fd: RawFd = unsafe { libc::dup(master_raw) };
        if writer_fd < 0 {
            return Err(format!(
                "dup() failed for PTY master writer: {}",
                std::io::Error::last_os_error()
            ));
        }
        let reader_fd: RawFd = unsafe { libc::dup(master_raw) };
        if reader_fd < 0 {
            unsafe {
                libc::close(writer_fd);
            }
            return Err(format!(
                "dup() failed for PTY master reader: {}",
                std::io::Error::last_os_error()
            ));
        }
        let master_write =
            tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(writer_fd) });
        let master_read =
            tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(reader_fd) });

        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let stdin_task = tokio::spawn(stdin_writer(master_write, stdin_rx));

        let out_task = tokio::spawn(output_reader(
            id.clone(),
            master_read,
            Arc::clone(&stdout_buf),
        ));

        let exit_task = tokio::spawn(exit_watcher(
            id.clone(),
            child,
            Arc::clone(&running),
            Arc::clone(&exit_code),
        ));

        Ok(Self {
            id,
            pid,
            kind: SessionKind::Pty,
            stdin_tx,
            stdout_buf,
            stderr_buf,
            running,
            exit_code,
            tasks: vec![stdin_task, out_task, exit_task],
            pty_master: Some(master),
        })
    }

    /// Wrap a pipe-backed child (three channels).
    pub fn spawn_pipes(id: String, mut child: Child) -> Result<Self, String> {
        let pid = child.id().unwrap_or(0);

        let stdin = child.stdin.take().ok_or("Failed to take stdin pipe")?;
        let stdout = child.stdout.take().ok_or("Failed to take stdout pipe")?;
        let stderr = child.stderr.take().ok_or("Failed to take stderr pipe")?;

        let stdout_buf = Arc::new(StdMutex::new(String::new()));
        let stderr_buf = Arc::new(StdMutex::new(String::new()));
        let running = Arc::new(AtomicBool::new(true));
        let exit_code: Arc<StdMutex<Option<i32>>> = Arc::new(StdMutex::new(None));

        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let stdin_task = tokio::spawn(stdin_writer(stdin, stdin_rx));
        let out_task = tokio::spawn(output_reader(id.clone(), stdout, Arc::clone(&stdout_buf)));
        let err_task = tokio::spawn(output_reader(id.clone(), stderr, Arc::clone(&stderr_buf)));
        let exit_task = tokio::spawn(exit_watcher(
            id.clone(),
            child,
            Arc::clone(&running),
            Arc::clone(&exit_code),
        ));

        Ok(Self {
            id,
            pid,
            kind: SessionKind::Pipes,
            stdin_tx,
            stdout_buf,
            stderr_buf,
            running,
            exit_code,
            tasks: vec![stdin_task, out_task, err_task, exit_task],
            pty_master: None,
        })
    }

    /// Queue bytes for the child's input channel. Returns the byte count on
    /// success; a dead stdin surfaces here as an error.
    pub async fn write_stdin(&self, data: &[u8]) -> Result<usize, String> {
        self.stdin_tx
            .send(data.to_vec())
            .await
            .map(|()| data.len())
            .map_err(|_| "Failed to write to session: stdin closed".to_string())
    }

    /// Drain accumulated output. Never blocks. PTY sessions return
    /// everything in `stdout` (the kernel merges the streams).
    pub fn drain_output(&self) -> (String, String) {
        let stdout = std::mem::take(&mut *self.stdout_buf.lock().expect("stdout buf poisoned"));
        let stderr = std::mem::take(&mut *self.stderr_buf.lock().expect("stderr buf poisoned"));
        (stdout, stderr)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().expect("exit code poisoned")
    }

    /// Send a signal to the session's process group.
    pub fn send_signal(&self, signal: i32) {
        kill_group(self.pid, signal);
    }

    /// Stop the session: deliver `signal` to the process group, give the
    /// child a short grace period, escalate to SIGKILL if it is still
    /// running, then abort the I/O tasks (closing the channels).
    pub async fn stop(&self, signal: i32) {
        if self.is_running() {
            self.send_signal(signal);
            let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
            while self.is_running() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            if self.is_running() {
                self.send_signal(libc::SIGKILL);
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Resize the PTY. Pipe sessions have no terminal to resize.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), String> {
        match self.pty_master {
            Some(ref master) => pty::resize_pty(master, rows, cols).map_err(|e| e.to_string()),
            None => Err("Not a PTY session".to_string()),
        }
    }
}

async fn stdin_writer(
    mut writer: impl tokio::io::AsyncWrite + Unpin + Send + 'static,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(data) = rx.recv().await {
        if writer.write_all(&data).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

async fn output_reader(
    session_id: String,
    mut reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    buf: Arc<StdMutex<String>>,
) {
    let mut tmp = [0u8; 4096];
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let data = String::from_utf8_lossy(&tmp[..n]);
                buf.lock().expect("output buf poisoned").push_str(&data);
            }
        }
    }
    info!("Session {session_id} output channel closed");
}

async fn exit_watcher(
    session_id: String,
    mut child: Child,
    running: Arc<AtomicBool>,
    exit_code: Arc<StdMutex<Option<i32>>>,
) {
    match child.wait().await {
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            info!("Session {session_id} exited with code {code}");
            *exit_code.lock().expect("exit code poisoned") = Some(code);
        }
        Err(e) => {
            error!("Session {session_id} wait error: {e}");
            *exit_code.lock().expect("exit code poisoned") = Some(-1);
        }
    }
    running.store(false, Ordering::SeqCst);
}
