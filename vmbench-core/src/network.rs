// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Virtual link provisioning for the microVM guest.
//!
//! The link is a single host tap device with a fixed name. Creation is
//! idempotent and teardown is best-effort, so a session can always call
//! [`NetworkFabric::release_link`] on its way out.

use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::exec::{CommandRunner, CommandSpec};

/// Owner of the host side of the guest network.
pub struct NetworkFabric {
    runner: Arc<dyn CommandRunner>,
    config: NetworkConfig,
}

impl NetworkFabric {
    pub fn new(runner: Arc<dyn CommandRunner>, config: NetworkConfig) -> Self {
        Self { runner, config }
    }

    /// Name of the tap device.
    pub fn device(&self) -> &str {
        &self.config.device
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether the device currently exists.
    pub async fn link_exists(&self) -> bool {
        let spec = CommandSpec::new("ip").args(["link", "show", self.device()]);
        matches!(self.runner.run(&spec).await, Ok(output) if output.success())
    }

    /// Make sure the tap device exists, is addressed and is up.
    ///
    /// Returns `false` when the link could not be provisioned; the caller
    /// decides whether that skips a backend.
    pub async fn ensure_link(&self) -> bool {
        if self.link_exists().await {
            tracing::debug!(device = %self.device(), "Tap device already present");
            return true;
        }

        let device = self.device();
        let host_cidr = self.config.host.to_string();
        let steps = [
            CommandSpec::new("ip")
                .args(["tuntap", "add", device, "mode", "tap"])
                .privileged(),
            CommandSpec::new("ip")
                .args(["addr", "add", host_cidr.as_str(), "dev", device])
                .privileged(),
            CommandSpec::new("ip")
                .args(["link", "set", device, "up"])
                .privileged(),
        ];

        for step in &steps {
            if let Err(e) = self.runner.run_checked(step).await {
                tracing::warn!(
                    device = %device,
                    command = %step.display(),
                    error = %e,
                    "Failed to set up tap device"
                );
                return false;
            }
        }

        tracing::info!(device = %device, host = %self.config.host, "Tap device ready");
        true
    }

    /// Delete the tap device. Never fails; errors are logged.
    pub async fn release_link(&self) {
        let spec = CommandSpec::new("ip")
            .args(["link", "delete", self.device()])
            .privileged();

        match self.runner.run_checked(&spec).await {
            Ok(_) => tracing::info!(device = %self.device(), "Tap device removed"),
            Err(e) => {
                tracing::debug!(device = %self.device(), error = %e, "Tap device not removed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::testing::{failed, ok, FakeRunner};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn network_config() -> NetworkConfig {
        ConfigLoader::defaults().unwrap().network
    }

    /// Fake host where `ip link show` succeeds once the device was added.
    fn fake_host() -> Arc<FakeRunner> {
        let exists = AtomicBool::new(false);
        Arc::new(FakeRunner::with_handler(move |spec| {
            let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
            match args.as_slice() {
                ["link", "show", _] if !exists.load(Ordering::SeqCst) => {
                    Ok(failed(1, "Device \"tap0\" does not exist."))
                }
                ["tuntap", "add", ..] => {
                    exists.store(true, Ordering::SeqCst);
                    Ok(ok(""))
                }
                ["link", "delete", _] => {
                    exists.store(false, Ordering::SeqCst);
                    Ok(ok(""))
                }
                _ => Ok(ok("")),
            }
        }))
    }

    #[tokio::test]
    async fn test_ensure_link_is_idempotent() {
        let runner = fake_host();
        let fabric = NetworkFabric::new(runner.clone(), network_config());

        assert!(fabric.ensure_link().await);
        assert!(fabric.ensure_link().await);

        assert_eq!(runner.count("ip", &["tuntap", "add"]), 1);
        assert_eq!(runner.count("ip", &["addr", "add"]), 1);
        assert_eq!(runner.count("ip", &["link", "set"]), 1);
    }

    #[tokio::test]
    async fn test_setup_commands_are_privileged() {
        let runner = fake_host();
        let fabric = NetworkFabric::new(runner.clone(), network_config());
        fabric.ensure_link().await;

        let calls = runner.calls();
        let addr = calls
            .iter()
            .find(|c| c.args.first().map(String::as_str) == Some("addr"))
            .unwrap();
        assert!(addr.privileged);
        assert_eq!(addr.args, ["addr", "add", "172.16.0.1/24", "dev", "tap0"]);
    }

    #[tokio::test]
    async fn test_setup_failure_reports_unavailable() {
        let runner = Arc::new(FakeRunner::with_handler(|spec| {
            if spec.args.first().map(String::as_str) == Some("link") {
                Ok(failed(1, "does not exist"))
            } else {
                Ok(failed(2, "Operation not permitted"))
            }
        }));
        let fabric = NetworkFabric::new(runner.clone(), network_config());

        assert!(!fabric.ensure_link().await);
        // Stops at the first failing step.
        assert_eq!(runner.count("ip", &["addr", "add"]), 0);
    }

    #[tokio::test]
    async fn test_release_link_swallows_errors() {
        let runner = Arc::new(FakeRunner::with_handler(|_| {
            Ok(failed(1, "Cannot find device \"tap0\""))
        }));
        let fabric = NetworkFabric::new(runner.clone(), network_config());

        fabric.release_link().await;
        fabric.release_link().await;

        assert_eq!(runner.count("ip", &["link", "delete"]), 2);
    }
}
