// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Test doubles shared by unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::cache::AssetFetcher;
use crate::error::{AssetError, ExecError};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

type Handler = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, ExecError> + Send + Sync>;

/// Records every command and answers through a handler closure.
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    handler: Handler,
}

impl FakeRunner {
    /// Every command exits 0 with empty output.
    pub(crate) fn succeeding() -> Self {
        Self::with_handler(|_| Ok(ok("")))
    }

    pub(crate) fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, ExecError> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose program and leading arguments match.
    pub(crate) fn count(&self, program: &str, leading: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program == program && c.args.iter().zip(leading).all(|(a, b)| a == b))
            .filter(|c| c.args.len() >= leading.len())
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.handler)(spec)
    }
}

pub(crate) fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub(crate) fn failed(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Local HTTP server answering 503 to the first `failures` requests and
/// 200 afterwards. Returns the bound port and the request counter.
pub(crate) async fn flaky_http_server(failures: usize) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let served = counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let status = if served < failures {
                "503 Service Unavailable"
            } else {
                "200 OK"
            };
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (port, hits)
}

/// Full id printed by the fake `docker run`.
pub(crate) const CONTAINER_ID: &str =
    "4f2a9c1b7d3e8f6a0b5c2d9e1f4a7b3c6d8e0f2a4b6c8d0e2f4a6b8c0d2e4f6a";

/// Fake host: `docker run` prints an id, the container reports as running,
/// `docker stats` returns fixed numbers and every other command succeeds.
pub(crate) fn fake_docker() -> FakeRunner {
    FakeRunner::with_handler(|spec| {
        Ok(match spec.args.first().map(String::as_str) {
            Some("run") if spec.program == "docker" => ok(&format!("{}\n", CONTAINER_ID)),
            Some("inspect") => ok("true\n"),
            Some("stats") => ok("10.00%,200MiB / 1.9GiB\n"),
            _ => ok(""),
        })
    })
}

/// Fetcher that writes a small zero-filled file instead of downloading.
pub(crate) struct StubFetcher;

#[async_trait]
impl AssetFetcher for StubFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), AssetError> {
        tokio::fs::write(dest, vec![0u8; 1024]).await.unwrap();
        Ok(())
    }
}
