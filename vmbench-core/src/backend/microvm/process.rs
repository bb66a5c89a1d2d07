// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Hypervisor process management.
//!
//! Spawns the hypervisor against a boot configuration and a control socket,
//! keeps the tail of its console output for diagnostics and terminates it
//! with SIGTERM, escalating to SIGKILL after a grace period.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::BackendError;
use crate::types::{BackendKind, ProcessId};

/// Bytes of console output kept per stream.
const OUTPUT_TAIL_BYTES: usize = 64 * 1024;

/// How long to wait for the output readers once the process has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Drains a child pipe so the hypervisor never blocks on a full console
/// buffer, keeping only the last [`OUTPUT_TAIL_BYTES`].
struct OutputTail {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl OutputTail {
    fn capture<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();

        let reader = tokio::spawn(async move {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let Ok(mut buf) = sink.lock() else { break };
                        buf.extend_from_slice(&chunk[..n]);
                        if buf.len() > OUTPUT_TAIL_BYTES {
                            let excess = buf.len() - OUTPUT_TAIL_BYTES;
                            buf.drain(..excess);
                        }
                    }
                }
            }
        });

        Self { buffer, reader }
    }

    async fn finish(self) -> String {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, self.reader).await;
        let bytes = self
            .buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// A running hypervisor.
pub struct HypervisorProcess {
    child: Child,
    pid: ProcessId,
    socket_path: PathBuf,
    stdout: Option<OutputTail>,
    stderr: Option<OutputTail>,
}

impl HypervisorProcess {
    /// Launch `binary --api-sock <socket> --config-file <config>`.
    ///
    /// A stale socket from an earlier run is removed first.
    pub fn spawn(binary: &Path, socket_path: &Path, config_path: &Path) -> Result<Self, BackendError> {
        let _ = std::fs::remove_file(socket_path);

        let mut child = Command::new(binary)
            .arg("--api-sock")
            .arg(socket_path)
            .arg("--config-file")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::LaunchFailed {
                backend: BackendKind::MicroVm,
                reason: format!("Failed to spawn {}: {}", binary.display(), e),
            })?;

        let pid = child
            .id()
            .and_then(|raw| ProcessId::new(raw).ok())
            .ok_or_else(|| BackendError::LaunchFailed {
                backend: BackendKind::MicroVm,
                reason: "Hypervisor exited before its pid could be read".to_string(),
            })?;

        let stdout = OutputTail::capture(child.stdout.take());
        let stderr = OutputTail::capture(child.stderr.take());

        tracing::debug!(
            pid = %pid,
            binary = %binary.display(),
            socket = %socket_path.display(),
            "Spawned hypervisor"
        );

        Ok(Self {
            child,
            pid,
            socket_path: socket_path.to_path_buf(),
            stdout: Some(stdout),
            stderr: Some(stderr),
        })
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Exit status if the process has already exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Captured (stdout, stderr) tails. Meant to be called once the process
    /// has exited; later calls return empty strings.
    pub async fn take_output(&mut self) -> (String, String) {
        let stdout = match self.stdout.take() {
            Some(tail) => tail.finish().await,
            None => String::new(),
        };
        let stderr = match self.stderr.take() {
            Some(tail) => tail.finish().await,
            None => String::new(),
        };
        (stdout, stderr)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Removes the control socket.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.is_running() {
            let pid = Pid::from_raw(self.pid.value() as i32);
            if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
                tracing::debug!(pid = %self.pid, error = %e, "SIGTERM failed");
            }

            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(_) => tracing::debug!(pid = %self.pid, "Hypervisor exited after SIGTERM"),
                Err(_) => {
                    tracing::warn!(
                        pid = %self.pid,
                        grace_ms = grace.as_millis() as u64,
                        "Hypervisor ignored SIGTERM, killing"
                    );
                    if let Err(e) = self.child.kill().await {
                        tracing::warn!(pid = %self.pid, error = %e, "Failed to kill hypervisor");
                    }
                }
            }
        }

        self.remove_socket();
    }

    fn remove_socket(&self) {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                socket = %self.socket_path.display(),
                error = %e,
                "Failed to remove control socket"
            ),
        }
    }
}

impl Drop for HypervisorProcess {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; the socket is ours to clean.
        self.remove_socket();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_exit_is_observed_with_output() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("firecracker.socket");

        // `sh` rejects `--api-sock` and exits with status 2.
        let mut process =
            HypervisorProcess::spawn(Path::new("sh"), &socket, &dir.path().join("vm_config.json"))
                .unwrap();

        let mut status = None;
        for _ in 0..200 {
            status = process.exit_status();
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(status.unwrap().code(), Some(2));
        let (_, stderr) = process.take_output().await;
        assert!(!stderr.trim().is_empty());

        // Output is handed out once.
        assert_eq!(process.take_output().await, (String::new(), String::new()));
    }

    #[tokio::test]
    async fn test_terminate_stops_process_and_removes_socket() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("firecracker.socket");

        let script = dir.path().join("idle-hypervisor");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut process =
            HypervisorProcess::spawn(&script, &socket, &dir.path().join("vm_config.json")).unwrap();
        std::fs::write(&socket, b"").unwrap();
        assert!(process.is_running());

        process.terminate(Duration::from_secs(2)).await;

        assert!(!process.is_running());
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_launch() {
        let dir = TempDir::new().unwrap();
        let err = HypervisorProcess::spawn(
            Path::new("/nonexistent/firecracker"),
            &dir.path().join("firecracker.socket"),
            &dir.path().join("vm_config.json"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BackendError::LaunchFailed { .. }));
    }
}
