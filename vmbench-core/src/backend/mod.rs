// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Sandbox backends.
//!
//! A backend owns at most one sandbox instance at a time and walks it through
//! prepare, start, await_ready, optionally monitor, then stop and release.
//! `stop` and `release` are best-effort and safe to call in any state.

pub mod container;
pub mod microvm;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::MonitorWindow;
use crate::error::BenchResult;
use crate::sampler::ResourceSummary;
use crate::state::InstanceState;
use crate::types::{BackendKind, InstanceHandle, WorkloadEndpoint};

pub use container::ContainerBackend;
pub use microvm::MicroVmBackend;

/// Result of a successful `prepare`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preparation {
    /// The backend can be started.
    Ready,
    /// The backend cannot run in this environment; skip it.
    Skip(String),
}

/// Cold-start measurement returned by `await_ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Wall-clock time since `start` launched the instance.
    pub elapsed: Duration,
    /// Whether the health endpoint actually answered.
    pub confirmed: bool,
    pub attempts: u32,
}

/// Lifecycle contract shared by every isolation technology.
#[async_trait]
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Where the workload is reachable once the instance is running.
    fn endpoint(&self) -> WorkloadEndpoint;

    /// Current lifecycle state of the owned instance.
    fn state(&self) -> InstanceState;

    /// Runtime handle of the live instance, if one exists.
    fn handle(&self) -> Option<InstanceHandle>;

    /// Build or derive everything `start` needs.
    async fn prepare(&mut self) -> BenchResult<Preparation>;

    /// Launch the instance. The cold-start clock starts here.
    async fn start(&mut self) -> BenchResult<()>;

    /// Wait for the workload to answer, within the backend's probe budget.
    async fn await_ready(&mut self) -> BenchResult<Readiness>;

    /// Sample resource usage of the running instance for `window`.
    async fn monitor(&mut self, window: &MonitorWindow) -> BenchResult<ResourceSummary>;

    /// Stop the instance. Never fails.
    async fn stop(&mut self);

    /// Remove everything the instance left behind. Never fails.
    async fn release(&mut self);
}
