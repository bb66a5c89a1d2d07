// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmark session sequencing.
//!
//! Backends run strictly one after another: first a cold-start pass over all
//! of them, then, when a monitoring window is set, a second pass that
//! provisions each backend again and samples its resource usage. Every run
//! ends with stop and release whatever happened, and the session ends by
//! releasing the network link.

use std::sync::Arc;

use crate::backend::{Backend, Preparation};
use crate::config::MonitorWindow;
use crate::error::{BackendError, BenchResult};
use crate::network::NetworkFabric;
use crate::report::{BenchmarkOutcome, BenchmarkResult, Comparison, SessionReport};

/// Runs a benchmark session over an ordered list of backends.
///
/// The first backend is the comparison baseline, the second the candidate.
pub struct Orchestrator {
    backends: Vec<Box<dyn Backend>>,
    fabric: Arc<NetworkFabric>,
    monitor: Option<MonitorWindow>,
    strict: bool,
}

impl Orchestrator {
    /// `monitor` enables the resource-usage pass; `strict` turns an
    /// unconfirmed readiness into a failed run.
    pub fn new(
        backends: Vec<Box<dyn Backend>>,
        fabric: Arc<NetworkFabric>,
        monitor: Option<MonitorWindow>,
        strict: bool,
    ) -> Self {
        Self {
            backends,
            fabric,
            monitor,
            strict,
        }
    }

    /// Run the whole session. Individual backend failures end up in the
    /// report; this never fails.
    pub async fn run(&mut self) -> SessionReport {
        let mut report = SessionReport::new();
        let strict = self.strict;

        tracing::info!(backends = self.backends.len(), "Starting cold start pass");
        for backend in self.backends.iter_mut() {
            let outcome = run_backend(backend.as_mut(), None, strict).await;
            report.cold_start.push(outcome);
        }

        if let Some(window) = self.monitor {
            tracing::info!(
                duration_secs = window.duration.as_secs(),
                cadence_ms = window.cadence.as_millis() as u64,
                "Starting resource usage pass"
            );
            for backend in self.backends.iter_mut() {
                let outcome = run_backend(backend.as_mut(), Some(&window), strict).await;
                report.resource_usage.push(outcome);
            }
        }

        report.comparison = compare(&report);
        self.fabric.release_link().await;

        tracing::info!("Benchmark session finished");
        report
    }

    /// Best-effort teardown of every backend and the network link, for an
    /// interrupted session.
    pub async fn abort(&mut self) {
        tracing::warn!("Aborting session, releasing all sandboxes");
        for backend in self.backends.iter_mut() {
            backend.stop().await;
            backend.release().await;
        }
        self.fabric.release_link().await;
    }
}

/// One full lifecycle. Stop and release always run; any error becomes a
/// `Failed` outcome.
async fn run_backend(
    backend: &mut dyn Backend,
    window: Option<&MonitorWindow>,
    strict: bool,
) -> BenchmarkOutcome {
    let kind = backend.kind();
    tracing::info!(backend = %kind, monitored = window.is_some(), "Running backend");

    let outcome = match measure(backend, window, strict).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(backend = %kind, error = %e, "Backend run failed");
            BenchmarkOutcome::Failed {
                backend: kind,
                reason: e.to_string(),
            }
        }
    };

    if let Some(handle) = backend.handle() {
        tracing::debug!(backend = %kind, instance = %handle, "Tearing down instance");
    }
    backend.stop().await;
    backend.release().await;

    outcome
}

async fn measure(
    backend: &mut dyn Backend,
    window: Option<&MonitorWindow>,
    strict: bool,
) -> BenchResult<BenchmarkOutcome> {
    let kind = backend.kind();

    if let Preparation::Skip(reason) = backend.prepare().await? {
        return Ok(BenchmarkOutcome::Skipped {
            backend: kind,
            reason,
        });
    }

    backend.start().await?;
    let readiness = backend.await_ready().await?;

    if !readiness.confirmed && strict {
        return Err(BackendError::ReadinessUnconfirmed {
            backend: kind,
            attempts: readiness.attempts,
        }
        .into());
    }

    let resources = match window {
        Some(window) => Some(backend.monitor(window).await?),
        None => None,
    };

    Ok(BenchmarkOutcome::Completed(BenchmarkResult {
        backend: kind,
        cold_start_seconds: readiness.elapsed.as_secs_f64(),
        ready_confirmed: readiness.confirmed,
        probe_attempts: readiness.attempts,
        resources,
    }))
}

/// Baseline/candidate comparison from the first two backends. The speed
/// figures need both cold-start runs, the resource deltas both monitored
/// runs; either set may be missing.
fn compare(report: &SessionReport) -> Option<Comparison> {
    let baseline = report.cold_start.first()?;
    let candidate = report.cold_start.get(1)?;
    let mut comparison = Comparison::new(baseline.backend(), candidate.backend());

    if let (Some(base), Some(cand)) = (baseline.result(), candidate.result()) {
        comparison = comparison.with_cold_start(base, cand);
    }

    let monitored = |index: usize| {
        report
            .resource_usage
            .get(index)
            .and_then(BenchmarkOutcome::result)
            .and_then(|r| r.resources)
    };
    if let (Some(base), Some(cand)) = (monitored(0), monitored(1)) {
        comparison = comparison.with_resources(&base, &cand);
    }

    (!comparison.is_empty()).then_some(comparison)
}
