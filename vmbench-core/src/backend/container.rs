// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Docker container backend.
//!
//! Drives the `docker` CLI: build the image from a context directory, run it
//! detached with the workload port published on the host loopback, probe the
//! port and sample `docker stats`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Backend, Preparation, Readiness};
use crate::config::{Config, ContainerConfig, MonitorWindow, ProbeConfig};
use crate::error::{BackendError, BenchResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::probe::HealthProber;
use crate::sampler::{self, parse_docker_stats, ResourceSample, ResourceSummary, SampleSource};
use crate::state::{InstanceLifecycle, InstanceState};
use crate::types::{BackendKind, ContainerId, InstanceHandle, Port, WorkloadEndpoint};

/// Upper bound for one `docker stats --no-stream` call.
const STATS_TIMEOUT: Duration = Duration::from_secs(2);

const STATS_FORMAT: &str = "{{.CPUPerc}},{{.MemUsage}}";

/// Container backend driving the Docker CLI.
pub struct ContainerBackend {
    runner: Arc<dyn CommandRunner>,
    config: ContainerConfig,
    probe: ProbeConfig,
    prober: HealthProber,
    port: Port,
    context: PathBuf,
    lifecycle: InstanceLifecycle,
    container: Option<ContainerId>,
    started_at: Option<Instant>,
}

impl ContainerBackend {
    /// Backend building its image from `context`, a directory holding a
    /// `Dockerfile`.
    pub fn new(runner: Arc<dyn CommandRunner>, config: &Config, context: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            config: config.container.clone(),
            probe: config.probe.clone(),
            prober: HealthProber::new(config.probe.request_timeout),
            port: config.workload.port,
            context: context.into(),
            lifecycle: InstanceLifecycle::new(BackendKind::Container),
            container: None,
            started_at: None,
        }
    }

    /// Running container, if any.
    pub fn container_id(&self) -> Option<&ContainerId> {
        self.container.as_ref()
    }

    fn failure(reason: impl Into<String>) -> BackendError {
        BackendError::LaunchFailed {
            backend: BackendKind::Container,
            reason: reason.into(),
        }
    }

    async fn is_running(&self, id: &ContainerId) -> bool {
        let spec = CommandSpec::new("docker").args([
            "inspect",
            "-f",
            "{{.State.Running}}",
            id.as_str(),
        ]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => output.stdout.trim() == "true",
            _ => false,
        }
    }
}

#[async_trait]
impl Backend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn endpoint(&self) -> WorkloadEndpoint {
        WorkloadEndpoint::loopback(self.port)
    }

    fn state(&self) -> InstanceState {
        self.lifecycle.state()
    }

    fn handle(&self) -> Option<InstanceHandle> {
        self.container.clone().map(InstanceHandle::Container)
    }

    async fn prepare(&mut self) -> BenchResult<Preparation> {
        let context = self.context.to_string_lossy().into_owned();
        tracing::info!(tag = %self.config.image_tag, context = %context, "Building container image");

        let spec = CommandSpec::new("docker").args([
            "build",
            "-t",
            self.config.image_tag.as_str(),
            context.as_str(),
        ]);
        let output = self.runner.run(&spec).await?;

        for line in output.stdout.lines().chain(output.stderr.lines()) {
            if !line.trim().is_empty() {
                tracing::debug!(target: "vmbench::docker_build", "{}", line);
            }
        }

        if !output.success() {
            let reason = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("docker build failed")
                .to_string();
            return Err(BackendError::BuildFailed {
                backend: BackendKind::Container,
                reason,
            }
            .into());
        }

        self.lifecycle.transition_to(InstanceState::Prepared)?;
        Ok(Preparation::Ready)
    }

    async fn start(&mut self) -> BenchResult<()> {
        let publish = format!("127.0.0.1:{port}:{port}", port = self.port);
        let spec = CommandSpec::new("docker").args([
            "run",
            "-d",
            "-p",
            publish.as_str(),
            self.config.image_tag.as_str(),
        ]);

        tracing::info!(tag = %self.config.image_tag, port = %self.port, "Starting container");
        self.started_at = Some(Instant::now());

        let output = self
            .runner
            .run_checked(&spec)
            .await
            .map_err(|e| Self::failure(e.to_string()))?;

        let printed = output.stdout.lines().last().unwrap_or_default();
        let id = ContainerId::new(printed.trim())
            .map_err(|e| Self::failure(format!("unexpected container id: {}", e)))?;

        tracing::debug!(container = %id, "Container launched");
        self.container = Some(id);
        self.lifecycle.transition_to(InstanceState::Running)?;
        Ok(())
    }

    async fn await_ready(&mut self) -> BenchResult<Readiness> {
        let started_at = self.started_at.ok_or(BackendError::NotRunning {
            backend: BackendKind::Container,
        })?;

        let outcome = self
            .prober
            .wait_ready(
                &self.endpoint().url(),
                self.probe.container_attempts,
                self.probe.container_interval,
            )
            .await;
        let elapsed = started_at.elapsed();

        if outcome.ready {
            self.lifecycle.transition_to(InstanceState::Ready)?;
        }

        tracing::info!(
            backend = %BackendKind::Container,
            elapsed_ms = elapsed.as_millis() as u64,
            confirmed = outcome.ready,
            attempts = outcome.attempts,
            "Container cold start measured"
        );

        Ok(Readiness {
            elapsed,
            confirmed: outcome.ready,
            attempts: outcome.attempts,
        })
    }

    async fn monitor(&mut self, window: &MonitorWindow) -> BenchResult<ResourceSummary> {
        let id = match (&self.container, self.lifecycle.state().is_live()) {
            (Some(id), true) => id.clone(),
            _ => {
                return Err(BackendError::NotRunning {
                    backend: BackendKind::Container,
                }
                .into())
            }
        };

        if !self.is_running(&id).await {
            return Err(BackendError::InstanceExited {
                backend: BackendKind::Container,
            }
            .into());
        }

        tracing::info!(
            container = %id,
            duration_secs = window.duration.as_secs(),
            "Monitoring container resources"
        );

        let mut source = DockerStatsSource::new(self.runner.clone(), id);
        Ok(sampler::collect(&mut source, window.duration, window.cadence).await)
    }

    async fn stop(&mut self) {
        if let Some(id) = &self.container {
            let grace = self.config.stop_timeout.as_secs().to_string();
            let spec = CommandSpec::new("docker").args(["stop", "-t", grace.as_str(), id.as_str()]);
            if let Err(e) = self.runner.run_checked(&spec).await {
                tracing::warn!(container = %id, error = %e, "Failed to stop container");
            }
        }
        self.lifecycle.advance_if_possible(InstanceState::Stopped);
    }

    async fn release(&mut self) {
        if let Some(id) = self.container.take() {
            let spec = CommandSpec::new("docker").args(["rm", "-f", id.as_str()]);
            match self.runner.run_checked(&spec).await {
                Ok(_) => tracing::debug!(container = %id, "Container removed"),
                Err(e) => tracing::warn!(container = %id, error = %e, "Failed to remove container"),
            }
        }
        self.started_at = None;
        self.lifecycle.advance_if_possible(InstanceState::Released);
    }
}

/// `docker stats` reader for one container.
pub struct DockerStatsSource {
    runner: Arc<dyn CommandRunner>,
    container: ContainerId,
}

impl DockerStatsSource {
    pub fn new(runner: Arc<dyn CommandRunner>, container: ContainerId) -> Self {
        Self { runner, container }
    }
}

#[async_trait]
impl SampleSource for DockerStatsSource {
    async fn sample(&mut self) -> ResourceSample {
        let spec = CommandSpec::new("docker")
            .args([
                "stats",
                "--no-stream",
                "--format",
                STATS_FORMAT,
                self.container.as_str(),
            ])
            .timeout(STATS_TIMEOUT);

        match self.runner.run_checked(&spec).await {
            Ok(output) => parse_docker_stats(output.stdout.lines().next().unwrap_or_default()),
            Err(e) => {
                tracing::debug!(container = %self.container, error = %e, "docker stats failed");
                ResourceSample::empty()
            }
        }
    }
}
