// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Text rendering of a session report.

use std::fmt::Write;

use vmbench_core::{BenchmarkOutcome, SessionReport};

const RULE: &str = "══════════════════════════════════════════════════";

/// Render the report as the human-readable summary printed after a run.
pub fn render_text(report: &SessionReport) -> String {
    let mut out = String::new();

    let host = &report.host;
    let _ = writeln!(
        out,
        "Host: {} ({}, {} CPUs, {:.0} MB)",
        host.hostname, host.os, host.logical_cpus, host.total_memory_mb
    );
    let _ = writeln!(out, "╔{}╗", RULE);
    let _ = writeln!(out, "║{:^50}║", "COLD START BENCHMARK");
    let _ = writeln!(out, "╚{}╝", RULE);
    for outcome in &report.cold_start {
        render_cold_start(&mut out, outcome);
    }

    if let Some((speedup, faster)) = report
        .comparison
        .as_ref()
        .and_then(|c| c.speedup().zip(c.faster))
    {
        let _ = writeln!(
            out,
            "  {:<22}{:.2}x faster ({})",
            "Speed difference:",
            speedup,
            faster.display_name()
        );
    }

    if !report.resource_usage.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "╔{}╗", RULE);
        let _ = writeln!(out, "║{:^50}║", "RESOURCE USAGE BENCHMARK");
        let _ = writeln!(out, "╚{}╝", RULE);
        for outcome in &report.resource_usage {
            render_resources(&mut out, outcome);
        }

        if let Some(comparison) = &report.comparison {
            if let (Some(cpu), Some(memory)) = (
                comparison.cpu_overhead_percent,
                comparison.memory_overhead_percent,
            ) {
                let label = format!(
                    "({} vs {})",
                    comparison.baseline.display_name(),
                    comparison.candidate.display_name()
                );
                let _ = writeln!(out);
                let _ = writeln!(out, "Comparison:");
                let _ = writeln!(out, "  CPU overhead:    {:+.1}% {}", cpu, label);
                let _ = writeln!(out, "  Memory overhead: {:+.1}% {}", memory, label);
            }
        }
    }

    out
}

fn render_cold_start(out: &mut String, outcome: &BenchmarkOutcome) {
    let name = format!("{}:", outcome.backend().display_name());
    match outcome {
        BenchmarkOutcome::Completed(result) => {
            let note = if result.ready_confirmed {
                ""
            } else {
                " (readiness not confirmed)"
            };
            let _ = writeln!(
                out,
                "  {:<22}{:.3} seconds{}",
                name, result.cold_start_seconds, note
            );
        }
        BenchmarkOutcome::Skipped { reason, .. } | BenchmarkOutcome::Failed { reason, .. } => {
            let _ = writeln!(out, "  {:<22}{} ({})", name, outcome.label(), reason);
        }
    }
}

fn render_resources(out: &mut String, outcome: &BenchmarkOutcome) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}:", outcome.backend().display_name());

    match outcome.result().and_then(|r| r.resources) {
        Some(summary) => {
            let _ = writeln!(out, "  Average CPU:     {:.2}%", summary.avg_cpu_percent);
            let _ = writeln!(out, "  Average Memory:  {:.2} MB", summary.avg_memory_mb);
            let _ = writeln!(out, "  Peak Memory:     {:.2} MB", summary.peak_memory_mb);
            let _ = writeln!(out, "  Samples:         {}", summary.samples_taken);
        }
        None => {
            let reason = match outcome {
                BenchmarkOutcome::Skipped { reason, .. }
                | BenchmarkOutcome::Failed { reason, .. } => reason.as_str(),
                BenchmarkOutcome::Completed(_) => "no samples",
            };
            let _ = writeln!(out, "  {} ({})", outcome.label(), reason);
        }
    }
}
