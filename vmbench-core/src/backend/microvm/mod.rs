// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Firecracker microVM backend.
//!
//! Prepare fetches the boot assets through the cache, derives a run-scoped
//! image, writes the boot configuration and makes sure the tap device is up.
//! A missing tap device skips the backend instead of failing the session.

pub mod boot;
pub mod process;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Pid, System};

use super::{Backend, Preparation, Readiness};
use crate::cache::{AssetCache, AssetKind};
use crate::config::{Config, MicroVmConfig, MonitorWindow, ProbeConfig, WorkloadConfig};
use crate::error::{BackendError, BenchError, BenchResult};
use crate::exec::CommandRunner;
use crate::image::{self, ImageCustomizer};
use crate::network::NetworkFabric;
use crate::probe::HealthProber;
use crate::sampler::{self, ResourceSample, ResourceSummary, SampleSource};
use crate::state::{InstanceLifecycle, InstanceState};
use crate::types::{BackendKind, InstanceHandle, ProcessId, WorkloadEndpoint};

pub use boot::BootConfig;
pub use process::HypervisorProcess;

/// Boot configuration file name inside the run directory.
pub const BOOT_CONFIG_FILE: &str = "vm_config.json";

/// Control socket file name inside the run directory.
pub const SOCKET_FILE: &str = "firecracker.socket";

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Files owned by one microVM run.
#[derive(Debug, Clone)]
struct RunArtifacts {
    dir: PathBuf,
    image: PathBuf,
    boot_config: PathBuf,
    socket: PathBuf,
}

impl RunArtifacts {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            image: dir.join(image::IMAGE_FILE),
            boot_config: dir.join(BOOT_CONFIG_FILE),
            socket: dir.join(SOCKET_FILE),
            dir,
        }
    }

    /// Best-effort removal; directories are removed only when empty.
    async fn remove(&self) {
        for file in [&self.image, &self.boot_config, &self.socket] {
            remove_quietly(tokio::fs::remove_file(file).await, file);
        }
        let mount_point = self.dir.join(image::MOUNT_DIR);
        remove_quietly(tokio::fs::remove_dir(&mount_point).await, &mount_point);
        remove_quietly(tokio::fs::remove_dir(&self.dir).await, &self.dir);
    }
}

fn remove_quietly(result: std::io::Result<()>, path: &Path) {
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove run artifact"),
    }
}

/// MicroVM backend driving the Firecracker binary.
pub struct MicroVmBackend {
    config: MicroVmConfig,
    probe: ProbeConfig,
    workload: WorkloadConfig,
    cache: AssetCache,
    customizer: ImageCustomizer,
    fabric: Arc<NetworkFabric>,
    prober: HealthProber,
    session_dir: PathBuf,
    runs: u32,
    lifecycle: InstanceLifecycle,
    artifacts: Option<RunArtifacts>,
    process: Option<HypervisorProcess>,
    started_at: Option<Instant>,
}

impl MicroVmBackend {
    /// Backend whose run directories live under `session_dir`.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: &Config,
        cache: AssetCache,
        fabric: Arc<NetworkFabric>,
        session_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            customizer: ImageCustomizer::new(
                runner,
                config.microvm.image_headroom_mib,
                config.privilege.clone(),
            ),
            config: config.microvm.clone(),
            probe: config.probe.clone(),
            workload: config.workload.clone(),
            cache,
            fabric,
            prober: HealthProber::new(config.probe.request_timeout),
            session_dir: session_dir.into(),
            runs: 0,
            lifecycle: InstanceLifecycle::new(BackendKind::MicroVm),
            artifacts: None,
            process: None,
            started_at: None,
        }
    }

    /// Directory of the current run, if one was prepared.
    pub fn run_dir(&self) -> Option<&Path> {
        self.artifacts.as_ref().map(|a| a.dir.as_path())
    }

    fn not_running() -> BenchError {
        BackendError::NotRunning {
            backend: BackendKind::MicroVm,
        }
        .into()
    }
}

#[async_trait]
impl Backend for MicroVmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MicroVm
    }

    fn endpoint(&self) -> WorkloadEndpoint {
        WorkloadEndpoint::new(
            self.fabric.config().guest.addr().to_string(),
            self.workload.port,
        )
    }

    fn state(&self) -> InstanceState {
        self.lifecycle.state()
    }

    fn handle(&self) -> Option<InstanceHandle> {
        self.process.as_ref().map(|p| InstanceHandle::Process(p.pid()))
    }

    async fn prepare(&mut self) -> BenchResult<Preparation> {
        let kernel = self.cache.ensure(AssetKind::Kernel).await?;
        let base_rootfs = self.cache.ensure(AssetKind::BaseRootfs).await?;

        self.runs += 1;
        let run = RunArtifacts::in_dir(self.session_dir.join(format!("microvm-run-{}", self.runs)));
        tokio::fs::create_dir_all(&run.dir)
            .await
            .map_err(|e| BenchError::Io {
                context: "creating microVM run directory",
                source: e,
            })?;
        // Registered before anything is written so release always finds it.
        self.artifacts = Some(run.clone());

        let script = image::render_startup_script(self.fabric.config(), &self.workload.entrypoint);
        let image = self
            .customizer
            .derive(&base_rootfs, &run.dir, &script)
            .await?;

        BootConfig::new(&kernel, &image, &self.config, self.fabric.config())
            .write(&run.boot_config)
            .await?;

        if !self.fabric.ensure_link().await {
            let reason = format!(
                "network device {} could not be set up (root privileges required)",
                self.fabric.device()
            );
            tracing::warn!(backend = %BackendKind::MicroVm, reason = %reason, "Skipping backend");
            return Ok(Preparation::Skip(reason));
        }

        self.lifecycle.transition_to(InstanceState::Prepared)?;
        tracing::info!(run_dir = %run.dir.display(), "MicroVM prepared");
        Ok(Preparation::Ready)
    }

    async fn start(&mut self) -> BenchResult<()> {
        let run = self.artifacts.as_ref().ok_or_else(Self::not_running)?;
        self.lifecycle.transition_to(InstanceState::Running)?;

        tracing::info!(
            binary = %self.config.hypervisor_bin.display(),
            config = %run.boot_config.display(),
            "Starting microVM"
        );
        self.started_at = Some(Instant::now());

        let process =
            HypervisorProcess::spawn(&self.config.hypervisor_bin, &run.socket, &run.boot_config)?;
        self.process = Some(process);
        Ok(())
    }

    async fn await_ready(&mut self) -> BenchResult<Readiness> {
        let started_at = self.started_at.ok_or_else(Self::not_running)?;
        let url = self.endpoint().url();
        let attempts = self.probe.microvm_attempts;
        let process = self.process.as_mut().ok_or_else(Self::not_running)?;

        let mut confirmed = false;
        let mut made = 0;
        for attempt in 1..=attempts {
            made = attempt;

            if let Some(status) = process.exit_status() {
                let (stdout, stderr) = process.take_output().await;
                tracing::error!(status = %status, stderr = %stderr.trim(), "Hypervisor exited before readiness");
                return Err(BackendError::HypervisorExited {
                    status,
                    stdout,
                    stderr,
                }
                .into());
            }

            if self.prober.probe_once(&url).await {
                confirmed = true;
                break;
            }

            if attempt < attempts {
                tokio::time::sleep(self.probe.microvm_interval).await;
            }
        }
        let elapsed = started_at.elapsed();

        if confirmed {
            self.lifecycle.transition_to(InstanceState::Ready)?;
        } else {
            tracing::warn!(url = %url, attempts = made, "MicroVM workload did not answer");
        }

        tracing::info!(
            backend = %BackendKind::MicroVm,
            elapsed_ms = elapsed.as_millis() as u64,
            confirmed = confirmed,
            attempts = made,
            "MicroVM cold start measured"
        );

        Ok(Readiness {
            elapsed,
            confirmed,
            attempts: made,
        })
    }

    async fn monitor(&mut self, window: &MonitorWindow) -> BenchResult<ResourceSummary> {
        if !self.lifecycle.state().is_live() {
            return Err(Self::not_running());
        }
        let process = self.process.as_mut().ok_or_else(Self::not_running)?;
        if !process.is_running() {
            return Err(BackendError::InstanceExited {
                backend: BackendKind::MicroVm,
            }
            .into());
        }

        tracing::info!(
            pid = %process.pid(),
            duration_secs = window.duration.as_secs(),
            "Monitoring hypervisor process resources"
        );

        let mut source = ProcessStatsSource::new(process.pid());
        Ok(sampler::collect(&mut source, window.duration, window.cadence).await)
    }

    async fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate(self.config.stop_grace).await;
            tracing::debug!(pid = %process.pid(), "MicroVM stopped");
        }
        self.lifecycle.advance_if_possible(InstanceState::Stopped);
    }

    async fn release(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate(self.config.stop_grace).await;
        }
        if let Some(run) = self.artifacts.take() {
            run.remove().await;
            tracing::debug!(run_dir = %run.dir.display(), "MicroVM run artifacts removed");
        }
        self.started_at = None;
        self.lifecycle.advance_if_possible(InstanceState::Released);
    }
}

/// Host-side accounting of the hypervisor process through `sysinfo`.
///
/// Process CPU usage is a delta between two refreshes, so the first sample
/// waits until the baseline taken in `new` is at least
/// [`CPU_BASELINE_INTERVAL`] old.
pub struct ProcessStatsSource {
    system: System,
    pid: Pid,
    baseline_at: Option<Instant>,
}

/// Minimum spacing between the baseline refresh and the first sample.
const CPU_BASELINE_INTERVAL: Duration = Duration::from_millis(250);

impl ProcessStatsSource {
    pub fn new(pid: ProcessId) -> Self {
        let pid = Pid::from_u32(pid.value());
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_process(pid);
        Self {
            system,
            pid,
            baseline_at: Some(Instant::now()),
        }
    }
}

#[async_trait]
impl SampleSource for ProcessStatsSource {
    async fn sample(&mut self) -> ResourceSample {
        if let Some(baseline_at) = self.baseline_at.take() {
            let waited = baseline_at.elapsed();
            if waited < CPU_BASELINE_INTERVAL {
                tokio::time::sleep(CPU_BASELINE_INTERVAL - waited).await;
            }
        }

        self.system.refresh_cpu();
        if !self.system.refresh_process(self.pid) {
            return ResourceSample::empty();
        }
        match self.system.process(self.pid) {
            Some(process) => ResourceSample::new(
                Some(f64::from(process.cpu_usage())),
                Some(process.memory() as f64 / BYTES_PER_MIB),
            ),
            None => ResourceSample::empty(),
        }
    }
}
