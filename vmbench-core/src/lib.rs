// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! vmbench Core Library
//!
//! Sandbox lifecycle orchestration and measurement engine. Provisions a
//! workload in a Docker container and in a Firecracker microVM, measures
//! cold start until the workload answers HTTP, samples resource usage and
//! tears everything down again.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod image;
pub mod network;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod sampler;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use backend::{Backend, ContainerBackend, MicroVmBackend, Preparation, Readiness};
pub use cache::{AssetCache, AssetKind};
pub use config::{Config, ConfigLoader, MonitorWindow};
pub use error::{BenchError, BenchResult, HardValidationError};
pub use exec::{CommandRunner, CommandSpec, SystemRunner};
pub use network::NetworkFabric;
pub use orchestrator::Orchestrator;
pub use report::{BenchmarkOutcome, BenchmarkResult, Comparison, SessionReport};
pub use sampler::ResourceSummary;
pub use state::{InstanceLifecycle, InstanceState};
pub use types::{BackendKind, ContainerId, Port, ProcessId, WorkloadEndpoint};
