// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! External command invocation.
//!
//! Every tool the engine drives (`docker`, `ip`, `mount`, `e2fsck`, `git`, ...)
//! goes through [`CommandRunner`], so lifecycle code can be exercised with a
//! scripted runner instead of a root shell.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ExecError;

/// Description of one external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    /// Run through the configured privilege command (e.g. `sudo`).
    pub privileged: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            privileged: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.as_str());
        parts.extend(self.args.iter().map(String::as_str));
        parts.join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is not an error here.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;

    /// Run a command and fail on a non-zero exit.
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let output = self.run(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExecError::NonZeroExit {
                program: spec.program.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    /// Prefix for privileged commands; `None` when already root.
    privilege: Option<String>,
}

impl SystemRunner {
    pub fn new(privilege: Option<String>) -> Self {
        Self { privilege }
    }

    fn build(&self, spec: &CommandSpec) -> Command {
        let mut cmd = match (&self.privilege, spec.privileged) {
            (Some(prefix), true) => {
                let mut cmd = Command::new(prefix);
                cmd.arg(&spec.program);
                cmd
            }
            _ => Command::new(&spec.program),
        };
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(Some("sudo".to_string()))
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        tracing::debug!(command = %spec.display(), privileged = spec.privileged, "Running command");

        let mut child = self.build(spec).spawn().map_err(|e| ExecError::Spawn {
            program: spec.program.clone(),
            source: e,
        })?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).await.map_err(|e| ExecError::Io {
                    program: spec.program.clone(),
                    source: e,
                })?;
                // Dropping stdin closes the pipe so tools like `tee` see EOF.
            }
        }

        let wait = child.wait_with_output();
        let output = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ExecError::Timeout {
                        program: spec.program.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => wait.await,
        }
        .map_err(|e| ExecError::Io {
            program: spec.program.clone(),
            source: e,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("ip")
            .args(["link", "show", "tap0"])
            .privileged();
        assert_eq!(spec.display(), "ip link show tap0");
        assert!(spec.privileged);
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemRunner::new(None);
        let output = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_system_runner_pipes_stdin() {
        let runner = SystemRunner::new(None);
        let output = runner
            .run_checked(&CommandSpec::new("cat").stdin("hello"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_run_checked_rejects_failure() {
        let runner = SystemRunner::new(None);
        let err = runner
            .run_checked(&CommandSpec::new("sh").args(["-c", "exit 1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NonZeroExit { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = SystemRunner::new(None);
        let err = runner
            .run(&CommandSpec::new("sleep").arg("5").timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }
}
