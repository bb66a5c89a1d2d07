// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for vmbench.
//!
//! Every failure mode is an explicit enum variant. Teardown paths never
//! return these errors; they log and continue.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::types::BackendKind;

/// Top-level error type for the measurement engine.
#[derive(Debug, Error)]
pub enum BenchError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // External Process Errors
    // =========================================================================
    #[error("Command error: {0}")]
    Exec(#[from] ExecError),

    // =========================================================================
    // MicroVM Provisioning Errors
    // =========================================================================
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Image customization error: {0}")]
    Image(#[from] ImageError),

    // =========================================================================
    // Backend Lifecycle Errors
    // =========================================================================
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid lifecycle transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors reject a configuration before any sandbox is touched.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Invalid CIDR address '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("Invalid MAC address '{value}'")]
    InvalidMac { value: String },

    #[error("Host {host} and guest {guest} are not on the same subnet")]
    SubnetMismatch { host: String, guest: String },
}

/// Errors from invoking external tools.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with code {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("'{program}' timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("I/O with '{program}' failed: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Asset cache errors. Fatal for the current backend run only.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Failed to create cache root {path}: {source}")]
    CacheRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Failed to publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sandbox image derivation errors.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Failed to copy base image {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to grow image {path}: {source}")]
    Grow {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Filesystem check reported uncorrectable errors (exit code {code:?})")]
    FsckFailed { code: Option<i32> },

    #[error("Image step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: ExecError,
    },

    #[error("Failed to prepare mount point {path}: {source}")]
    MountPoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Backend lifecycle errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} image build failed: {reason}")]
    BuildFailed { backend: BackendKind, reason: String },

    #[error("{backend} failed to launch: {reason}")]
    LaunchFailed { backend: BackendKind, reason: String },

    #[error("{backend} has no running instance")]
    NotRunning { backend: BackendKind },

    #[error("{backend} instance exited before monitoring could start")]
    InstanceExited { backend: BackendKind },

    #[error("Hypervisor exited before readiness ({status})\nstdout: {stdout}\nstderr: {stderr}")]
    HypervisorExited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },

    #[error("{backend} workload never answered its health endpoint ({attempts} attempts)")]
    ReadinessUnconfirmed { backend: BackendKind, attempts: u32 },

    #[error("Failed to write boot configuration {path}: {reason}")]
    BootConfig { path: PathBuf, reason: String },
}

/// Lifecycle transition errors for a sandbox instance.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for the {backend} backend")]
    InvalidTransition {
        backend: BackendKind,
        from: &'static str,
        to: &'static str,
    },
}

/// Result type alias using BenchError.
pub type BenchResult<T> = Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::InvalidFieldValue {
            field: "monitor.cadence_ms",
            value: "0".to_string(),
            reason: "Cadence must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("monitor.cadence_ms"));
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_error_chain() {
        let exec_err = ExecError::NonZeroExit {
            program: "resize2fs".to_string(),
            code: Some(1),
            stderr: "bad superblock".to_string(),
        };
        let image_err = ImageError::Step {
            step: "resize2fs",
            source: exec_err,
        };
        let bench_err: BenchError = image_err.into();
        assert!(matches!(bench_err, BenchError::Image(_)));
        assert!(bench_err.to_string().contains("resize2fs"));
    }
}
