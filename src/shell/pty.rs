//! PTY allocation, shell resolution, spawning, and terminal resize.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd is kept alive
//! for the session lifetime so I/O and resize operations can be performed on
//! it.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use tokio::process::{Child, Command};

/// Default terminal geometry for new sessions.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocate a PTY pair with the given terminal size.
pub fn allocate_pty(rows: u16, cols: u16) -> Result<PtyPair, nix::Error> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let OpenptyResult { master, slave } = openpty(&winsize, None)?;
    Ok(PtyPair { master, slave })
}

/// Resolve the shell binary for a session.
///
/// Empty input and the aliases `bash`, `sh`, `zsh` (with or without a
/// leading `/bin/`) probe the usual locations and take the first executable
/// hit. Explicit paths run as given. `/bin/sh` is the last resort.
pub fn resolve_shell(command: &str) -> String {
    let want = if command.is_empty() { "bash" } else { command };
    let candidates: &[&str] = match want {
        "bash" | "/bin/bash" => &["/bin/bash", "/usr/bin/bash"],
        "sh" | "/bin/sh" => &["/bin/sh", "/usr/bin/sh"],
        "zsh" | "/bin/zsh" => &["/bin/zsh", "/usr/bin/zsh"],
        other => return other.to_string(),
    };
    for path in candidates {
        if is_executable(path) {
            return (*path).to_string();
        }
    }
    "/bin/sh".to_string()
}

fn is_executable(path: &str) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::X_OK).is_ok()
}

/// Spawn an interactive shell on the slave side of the PTY.
///
/// The child becomes a session leader with the PTY slave as its controlling
/// terminal; stdin/stdout/stderr all point at the slave fd. `TERM` and
/// `COLORTERM` are set unless the caller overrides them.
pub fn spawn_shell_pty(
    pty: &PtyPair,
    shell: &str,
    working_dir: Option<&str>,
    env: Option<&HashMap<String, String>>,
) -> std::io::Result<Child> {
    let slave_fd = pty.slave.as_raw_fd();
    let mut cmd = Command::new(shell);
    cmd.arg("-i");
    if let Some(dir) = working_dir {
        if !dir.is_empty() {
            cmd.current_dir(dir);
        }
    }
    cmd.kill_on_drop(true);

    // The child's stdio is wired up by pre_exec (dup2 to the PTY slave), so
    // tokio must not set up pipes.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    if let Some(vars) = env {
        cmd.envs(vars);
    }

    // SAFETY: all syscalls used here are async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(move || {
            // New session, child is the session leader
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // PTY slave becomes the controlling terminal
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Resize a PTY's terminal window.
pub fn resize_pty(master: &OwnedFd, rows: u16, cols: u16) -> Result<(), nix::Error> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ is a well-defined ioctl that reads a Winsize struct.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCSWINSZ,
            std::ptr::addr_of!(winsize),
        )
    };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_shell_probes_aliases() {
        // /bin/sh exists on any POSIX host this test runs on.
        let sh = resolve_shell("sh");
        assert!(sh == "/bin/sh" || sh == "/usr/bin/sh");
        // Empty input means "give me a usable interactive shell".
        assert!(!resolve_shell("").is_empty());
    }

    #[test]
    fn resolve_shell_passes_explicit_paths_through() {
        assert_eq!(resolve_shell("/opt/weird/fish"), "/opt/weird/fish");
    }

    #[test]
    fn allocate_pty_yields_usable_fds() {
        let pty = allocate_pty(DEFAULT_ROWS, DEFAULT_COLS).unwrap();
        assert!(pty.master.as_raw_fd() >= 0);
        assert!(pty.slave.as_raw_fd() >= 0);
        resize_pty(&pty.master, 40, 120).unwrap();
    }
}
