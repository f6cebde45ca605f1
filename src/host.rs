//! Host operating system access
//!
//! Every external interaction (running commands, spawning and signalling the daemon,
//! probing `/proc` and the filesystem) goes through the [`Host`] trait so the
//! reconciliation and dispatch logic can be exercised against a scripted host.
//!
//! Failure is never an error here: a command that cannot start or exceeds its
//! timeout yields `None`, which callers treat as "no new information".

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// External operations needed to observe and control the daemon
pub trait Host: Send + Sync + 'static {
    /// Run `program` with `args`, returning its stdout.
    ///
    /// Returns `None` if the program fails to start or does not finish within `timeout`.
    /// The exit status is not inspected: `service tor status` of a stopped unit exits
    /// non-zero but still prints the text we need, and `pidof` exits 1 when nothing matches.
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Option<String>> + Send;

    /// Spawn `program` detached from the caller's stdio, returning its pid
    fn spawn_detached(&self, program: &str, args: &[&str]) -> Option<u32>;

    /// Send SIGTERM to `pid`. Returns whether the signal was delivered.
    fn terminate(&self, pid: u32) -> bool;

    /// Whether a process table entry exists for `pid`
    fn process_exists(&self, pid: u32) -> bool;

    /// Whether `path` exists and is a regular file (not a symlink)
    fn is_regular_file(&self, path: &Path) -> bool;

    /// Whether we already run with administrator privileges
    fn is_root(&self) -> bool;
}

/// The real host, backed by `tokio::process`, `nix` and `/proc`
#[derive(Debug, Clone)]
pub struct SystemHost {
    proc_root: PathBuf,
}

impl SystemHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for SystemHost {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Option<String> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to start {program}: {e}");
                return None;
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                trace!("{program} {args:?} -> {stdout:?}");
                Some(stdout)
            }
            Ok(Err(e)) => {
                debug!("Failed to collect output of {program}: {e}");
                None
            }
            Err(_) => {
                // Dropping the future kills the child (kill_on_drop)
                debug!("{program} {args:?} timed out after {timeout:?}");
                None
            }
        }
    }

    fn spawn_detached(&self, program: &str, args: &[&str]) -> Option<u32> {
        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn();

        match spawned {
            Ok(mut child) => {
                let pid = child.id();
                // Reap the child when it exits so a dead daemon does not linger in /proc
                tokio::spawn(async move {
                    if let Ok(status) = child.wait().await {
                        debug!("Detached {status}");
                    }
                });
                pid
            }
            Err(e) => {
                warn!("Failed to spawn {program}: {e}");
                None
            }
        }
    }

    fn terminate(&self, pid: u32) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send SIGTERM to {pid}: {e}");
                false
            }
        }
    }

    fn process_exists(&self, pid: u32) -> bool {
        self.proc_root.join(pid.to_string()).exists()
    }

    fn is_regular_file(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_file())
    }

    fn is_root(&self) -> bool {
        users::get_current_uid() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_exists_for_self() {
        let host = SystemHost::new();
        assert!(host.process_exists(std::process::id()));
    }

    #[test]
    fn test_is_regular_file_rejects_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cron");
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        let link = dir.path().join("cron-link");
        std::os::unix::fs::symlink(&file, &link).unwrap();

        let host = SystemHost::new();
        assert!(host.is_regular_file(&file));
        assert!(!host.is_regular_file(&link));
        assert!(!host.is_regular_file(&dir.path().join("missing")));
    }

    #[tokio::test]
    async fn test_run_missing_program_is_inconclusive() {
        let host = SystemHost::new();
        let out = host
            .run("onionctl-no-such-program", &[], Duration::from_secs(1))
            .await;
        assert!(out.is_none());
    }
}
