// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Session result model.
//!
//! Everything here is plain data: the orchestrator fills it in, the CLI
//! renders it as text or JSON. Nothing is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::sampler::ResourceSummary;
use crate::types::BackendKind;

/// Measurement of one backend run that reached `await_ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub backend: BackendKind,
    /// Seconds from launch to the first healthy response, or to the end of
    /// the probe budget when readiness was not confirmed.
    pub cold_start_seconds: f64,
    pub ready_confirmed: bool,
    pub probe_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSummary>,
}

/// How one backend run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BenchmarkOutcome {
    Completed(BenchmarkResult),
    Skipped { backend: BackendKind, reason: String },
    Failed { backend: BackendKind, reason: String },
}

impl BenchmarkOutcome {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Completed(result) => result.backend,
            Self::Skipped { backend, .. } | Self::Failed { backend, .. } => *backend,
        }
    }

    pub fn result(&self) -> Option<&BenchmarkResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Short status label for tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "OK",
            Self::Skipped { .. } => "SKIPPED",
            Self::Failed { .. } => "FAILED",
        }
    }
}

/// Relative difference `(baseline - candidate) / baseline` in percent.
/// Positive means the candidate uses less. Zero when the baseline is zero.
pub fn overhead_percent(baseline: f64, candidate: f64) -> f64 {
    if baseline > 0.0 {
        (baseline - candidate) / baseline * 100.0
    } else {
        0.0
    }
}

/// Baseline versus candidate comparison.
///
/// Cold-start and resource figures are filled independently: a failed
/// cold-start run still leaves the resource deltas of the monitored pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub baseline: BackendKind,
    pub candidate: BackendKind,
    /// `baseline / candidate` cold start; above 1 means the candidate is faster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faster: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_overhead_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_overhead_percent: Option<f64>,
}

impl Comparison {
    /// Empty comparison between two backends.
    pub fn new(baseline: BackendKind, candidate: BackendKind) -> Self {
        Self {
            baseline,
            candidate,
            speed_ratio: None,
            faster: None,
            cpu_overhead_percent: None,
            memory_overhead_percent: None,
        }
    }

    /// Compare two cold-start results.
    pub fn between(baseline: &BenchmarkResult, candidate: &BenchmarkResult) -> Self {
        Self::new(baseline.backend, candidate.backend).with_cold_start(baseline, candidate)
    }

    /// Add the cold-start ratio and winner.
    pub fn with_cold_start(mut self, baseline: &BenchmarkResult, candidate: &BenchmarkResult) -> Self {
        let ratio = if candidate.cold_start_seconds > 0.0 {
            baseline.cold_start_seconds / candidate.cold_start_seconds
        } else {
            0.0
        };
        self.speed_ratio = Some(ratio);
        self.faster = Some(if ratio > 1.0 {
            candidate.backend
        } else {
            baseline.backend
        });
        self
    }

    /// Add resource deltas from the monitored runs.
    pub fn with_resources(mut self, baseline: &ResourceSummary, candidate: &ResourceSummary) -> Self {
        self.cpu_overhead_percent = Some(overhead_percent(
            baseline.avg_cpu_percent,
            candidate.avg_cpu_percent,
        ));
        self.memory_overhead_percent = Some(overhead_percent(
            baseline.avg_memory_mb,
            candidate.avg_memory_mb,
        ));
        self
    }

    /// How many times faster the winner is, always >= 1 for non-zero inputs.
    pub fn speedup(&self) -> Option<f64> {
        self.speed_ratio.map(|ratio| {
            if ratio >= 1.0 || ratio == 0.0 {
                ratio
            } else {
                1.0 / ratio
            }
        })
    }

    /// Whether anything was actually compared.
    pub fn is_empty(&self) -> bool {
        self.speed_ratio.is_none() && self.cpu_overhead_percent.is_none()
    }
}

/// Host the session ran on, so reports from different machines are not
/// compared by accident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    /// Distribution name and version, e.g. `Ubuntu 22.04`.
    pub os: String,
    pub kernel: Option<String>,
    pub cpu: String,
    pub logical_cpus: usize,
    pub total_memory_mb: f64,
}

impl HostInfo {
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        let unknown = || "unknown".to_string();
        let os = match (System::name(), System::os_version()) {
            (Some(name), Some(version)) => format!("{} {}", name, version),
            (Some(name), None) => name,
            _ => unknown(),
        };

        Self {
            hostname: System::host_name().unwrap_or_else(unknown),
            os,
            kernel: System::kernel_version(),
            cpu: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .unwrap_or_else(unknown),
            logical_cpus: sys.cpus().len(),
            total_memory_mb: sys.total_memory() as f64 / (1024.0 * 1024.0),
        }
    }
}

/// Everything one `vmbench run` measured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub host: HostInfo,
    /// One outcome per backend, in run order.
    pub cold_start: Vec<BenchmarkOutcome>,
    /// Monitored runs; empty when no monitoring window was requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_usage: Vec<BenchmarkOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

impl SessionReport {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            host: HostInfo::collect(),
            cold_start: Vec::new(),
            resource_usage: Vec::new(),
            comparison: None,
        }
    }

    /// Cold-start outcome of `backend`, if it ran.
    pub fn cold_start_of(&self, backend: BackendKind) -> Option<&BenchmarkOutcome> {
        self.cold_start.iter().find(|o| o.backend() == backend)
    }

    /// Resource-run outcome of `backend`, if it ran.
    pub fn resource_usage_of(&self, backend: BackendKind) -> Option<&BenchmarkOutcome> {
        self.resource_usage.iter().find(|o| o.backend() == backend)
    }
}

impl Default for SessionReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(backend: BackendKind, seconds: f64) -> BenchmarkResult {
        BenchmarkResult {
            backend,
            cold_start_seconds: seconds,
            ready_confirmed: true,
            probe_attempts: 1,
            resources: None,
        }
    }

    fn summary(cpu: f64, memory: f64) -> ResourceSummary {
        ResourceSummary {
            avg_cpu_percent: cpu,
            avg_memory_mb: memory,
            peak_memory_mb: memory,
            samples_taken: 20,
        }
    }

    #[test]
    fn test_cpu_overhead_ten_versus_four() {
        let comparison = Comparison::between(
            &result(BackendKind::Container, 1.0),
            &result(BackendKind::MicroVm, 0.5),
        )
        .with_resources(&summary(10.0, 100.0), &summary(4.0, 150.0));

        assert!((comparison.cpu_overhead_percent.unwrap() - 60.0).abs() < 1e-9);
        assert!((comparison.memory_overhead_percent.unwrap() + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_resource_only_comparison() {
        let comparison = Comparison::new(BackendKind::Container, BackendKind::MicroVm)
            .with_resources(&summary(10.0, 100.0), &summary(4.0, 100.0));

        assert!(!comparison.is_empty());
        assert!(comparison.speedup().is_none());
        assert!((comparison.cpu_overhead_percent.unwrap() - 60.0).abs() < 1e-9);

        let value = serde_json::to_value(&comparison).unwrap();
        assert!(value.get("speed_ratio").is_none());
        assert!(value.get("faster").is_none());
        assert!(Comparison::new(BackendKind::Container, BackendKind::MicroVm).is_empty());
    }

    #[test]
    fn test_zero_baseline_gives_zero_overhead() {
        assert_eq!(overhead_percent(0.0, 12.0), 0.0);
    }

    #[test]
    fn test_faster_backend() {
        let container = result(BackendKind::Container, 2.0);
        let microvm = result(BackendKind::MicroVm, 0.5);

        let comparison = Comparison::between(&container, &microvm);
        assert_eq!(comparison.speed_ratio, Some(4.0));
        assert_eq!(comparison.faster, Some(BackendKind::MicroVm));
        assert_eq!(comparison.speedup(), Some(4.0));

        let comparison = Comparison::between(&microvm, &container);
        assert_eq!(comparison.faster, Some(BackendKind::MicroVm));
        assert_eq!(comparison.speedup(), Some(4.0));
        assert!(comparison.cpu_overhead_percent.is_none());
    }

    #[test]
    fn test_outcome_json_shape() {
        let failed = BenchmarkOutcome::Failed {
            backend: BackendKind::MicroVm,
            reason: "hypervisor exited".to_string(),
        };
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["backend"], "microvm");
        assert_eq!(failed.label(), "FAILED");

        let completed = BenchmarkOutcome::Completed(result(BackendKind::Container, 0.25));
        let value = serde_json::to_value(&completed).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["cold_start_seconds"], 0.25);
        assert!(value.get("resources").is_none());
    }
}
