// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Periodic CPU/memory sampling and reduction to summary statistics.
//!
//! Sampling never fails: a source that cannot read or parse a field leaves
//! it empty, and the reduction averages only the fields that were present.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// One reading of an instance's resource usage.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<f64>,
}

impl ResourceSample {
    pub fn new(cpu_percent: Option<f64>, memory_mb: Option<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent,
            memory_mb,
        }
    }

    /// A sample where nothing could be read.
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    pub fn is_empty(&self) -> bool {
        self.cpu_percent.is_none() && self.memory_mb.is_none()
    }
}

/// Reduced statistics over a monitoring window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub avg_cpu_percent: f64,
    pub avg_memory_mb: f64,
    pub peak_memory_mb: f64,
    /// Samples with at least one readable field.
    pub samples_taken: usize,
}

impl ResourceSummary {
    /// Reduce samples, ignoring missing fields. Zero everywhere when
    /// nothing was readable.
    pub fn from_samples(samples: &[ResourceSample]) -> Self {
        let cpu: Vec<f64> = samples.iter().filter_map(|s| s.cpu_percent).collect();
        let memory: Vec<f64> = samples.iter().filter_map(|s| s.memory_mb).collect();

        Self {
            avg_cpu_percent: mean(&cpu),
            avg_memory_mb: mean(&memory),
            peak_memory_mb: memory.iter().copied().fold(0.0, f64::max),
            samples_taken: samples.iter().filter(|s| !s.is_empty()).count(),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Backend-specific accounting surface for one running instance.
#[async_trait]
pub trait SampleSource: Send {
    async fn sample(&mut self) -> ResourceSample;
}

/// Sample `source` every `cadence` while less than `duration` has elapsed.
///
/// The cadence sleep happens after every sample whether or not it was
/// readable.
pub async fn collect(
    source: &mut dyn SampleSource,
    duration: Duration,
    cadence: Duration,
) -> ResourceSummary {
    let start = Instant::now();
    let mut samples = Vec::new();

    while start.elapsed() < duration {
        let sample = source.sample().await;
        if sample.is_empty() {
            tracing::debug!("Dropped unreadable resource sample");
        }
        samples.push(sample);
        tokio::time::sleep(cadence).await;
    }

    let summary = ResourceSummary::from_samples(&samples);
    tracing::info!(
        attempted = samples.len(),
        samples_taken = summary.samples_taken,
        avg_cpu_percent = summary.avg_cpu_percent,
        avg_memory_mb = summary.avg_memory_mb,
        peak_memory_mb = summary.peak_memory_mb,
        "Resource monitoring finished"
    );
    summary
}

/// Parse a memory quantity such as `512MiB`, `1.5GiB`, `900kB` or `0B`
/// into MiB.
pub fn parse_memory_mb(text: &str) -> Option<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let value: f64 = number.parse().ok()?;
    let bytes_per_unit = match unit.trim() {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => BYTES_PER_MIB,
        "GiB" => BYTES_PER_MIB * 1024.0,
        "TiB" => BYTES_PER_MIB * 1024.0 * 1024.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };

    Some(value * bytes_per_unit / BYTES_PER_MIB)
}

/// Parse a CPU percentage such as `1.23%`.
pub fn parse_cpu_percent(text: &str) -> Option<f64> {
    let text = text.trim();
    let value: f64 = text.strip_suffix('%').unwrap_or(text).trim().parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Parse one `docker stats` line in `{{.CPUPerc}},{{.MemUsage}}` format,
/// e.g. `1.23%,45.6MiB / 1.9GiB`. Each field is parsed independently.
pub fn parse_docker_stats(line: &str) -> ResourceSample {
    let (cpu, memory) = match line.trim().split_once(',') {
        Some((cpu, memory)) => (cpu, memory),
        None => (line, ""),
    };

    let used = memory.split('/').next().unwrap_or_default();
    ResourceSample::new(parse_cpu_percent(cpu), parse_memory_mb(used))
}
