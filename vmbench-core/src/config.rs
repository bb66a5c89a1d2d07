// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict validation.
//!
//! Every field has a default matching the reference setup (port 8080,
//! `tap0`, 172.16.0.0/24, 1 vCPU / 512 MiB), so an empty file is valid.
//! Any invalid field results in a HardValidationError before a sandbox is
//! provisioned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BenchError, BenchResult, HardValidationError};
use crate::types::{Ipv4Cidr, MacAddress, Port};

pub const DEFAULT_KERNEL_URL: &str =
    "https://s3.amazonaws.com/spec.ccfc.min/img/quickstart_guide/x86_64/kernels/vmlinux.bin";
pub const DEFAULT_ROOTFS_URL: &str =
    "https://s3.amazonaws.com/spec.ccfc.min/img/quickstart_guide/x86_64/rootfs/bionic.rootfs.ext4";

/// Raw workload section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawWorkloadConfig {
    port: u16,
    /// Defaults to a Python HTTP server on `port`.
    entrypoint: Option<String>,
}

impl Default for RawWorkloadConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            entrypoint: None,
        }
    }
}

/// Raw container section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawContainerConfig {
    image_tag: String,
    stop_timeout_secs: u64,
}

impl Default for RawContainerConfig {
    fn default() -> Self {
        Self {
            image_tag: "test-image:latest".to_string(),
            stop_timeout_secs: 2,
        }
    }
}

/// Raw health-probe section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawProbeConfig {
    container_attempts: u32,
    container_interval_ms: u64,
    microvm_attempts: u32,
    microvm_interval_ms: u64,
    request_timeout_ms: u64,
    strict: bool,
}

impl Default for RawProbeConfig {
    fn default() -> Self {
        Self {
            container_attempts: 30,
            container_interval_ms: 100,
            microvm_attempts: 100, // 10 seconds at 100ms
            microvm_interval_ms: 100,
            request_timeout_ms: 500,
            strict: false,
        }
    }
}

/// Raw resource-monitoring section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawMonitorConfig {
    duration_secs: u64,
    cadence_ms: u64,
}

impl Default for RawMonitorConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            cadence_ms: 500,
        }
    }
}

/// Raw microVM section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawMicroVmConfig {
    hypervisor_bin: String,
    cache_dir: Option<String>,
    kernel_url: String,
    rootfs_url: String,
    vcpu_count: u8,
    mem_size_mib: u32,
    smt: bool,
    image_headroom_mib: u64,
    boot_args: String,
    stop_grace_ms: u64,
}

impl Default for RawMicroVmConfig {
    fn default() -> Self {
        Self {
            hypervisor_bin: "firecracker".to_string(),
            cache_dir: None,
            kernel_url: DEFAULT_KERNEL_URL.to_string(),
            rootfs_url: DEFAULT_ROOTFS_URL.to_string(),
            vcpu_count: 1,
            mem_size_mib: 512,
            smt: false,
            image_headroom_mib: 100,
            boot_args: "console=ttyS0 reboot=k panic=1 pci=off".to_string(),
            stop_grace_ms: 2000,
        }
    }
}

/// Raw network section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawNetworkConfig {
    device: String,
    host_cidr: String,
    guest_cidr: String,
    guest_mac: String,
}

impl Default for RawNetworkConfig {
    fn default() -> Self {
        Self {
            device: "tap0".to_string(),
            host_cidr: "172.16.0.1/24".to_string(),
            guest_cidr: "172.16.0.2/24".to_string(),
            guest_mac: "AA:FC:00:00:00:01".to_string(),
        }
    }
}

/// Raw privilege section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawPrivilegeConfig {
    command: String,
}

impl Default for RawPrivilegeConfig {
    fn default() -> Self {
        Self {
            command: "sudo".to_string(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    workload: RawWorkloadConfig,
    container: RawContainerConfig,
    probe: RawProbeConfig,
    monitor: RawMonitorConfig,
    microvm: RawMicroVmConfig,
    network: RawNetworkConfig,
    privilege: RawPrivilegeConfig,
}

/// Validated workload settings.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub port: Port,
    /// Command launched in the background by the guest startup script.
    pub entrypoint: String,
}

/// Validated container settings.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image_tag: String,
    pub stop_timeout: Duration,
}

/// Validated readiness-probe budgets.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub container_attempts: u32,
    pub container_interval: Duration,
    pub microvm_attempts: u32,
    pub microvm_interval: Duration,
    pub request_timeout: Duration,
    /// Treat an unconfirmed readiness as a failed measurement.
    pub strict: bool,
}

/// Validated monitoring window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorWindow {
    pub duration: Duration,
    pub cadence: Duration,
}

/// Validated microVM settings.
#[derive(Debug, Clone)]
pub struct MicroVmConfig {
    pub hypervisor_bin: PathBuf,
    pub cache_dir: PathBuf,
    pub kernel_url: String,
    pub rootfs_url: String,
    pub vcpu_count: u8,
    pub mem_size_mib: u32,
    pub smt: bool,
    pub image_headroom_mib: u64,
    /// Kernel command line without the `init=` parameter.
    pub boot_args: String,
    pub stop_grace: Duration,
}

/// Validated virtual-link settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub device: String,
    pub host: Ipv4Cidr,
    pub guest: Ipv4Cidr,
    pub guest_mac: MacAddress,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub workload: WorkloadConfig,
    pub container: ContainerConfig,
    pub probe: ProbeConfig,
    pub monitor: MonitorWindow,
    pub microvm: MicroVmConfig,
    pub network: NetworkConfig,
    /// Prefix for privileged commands; `None` when running as root.
    pub privilege: Option<String>,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> BenchResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BenchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BenchError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> BenchResult<Config> {
        if content.trim().is_empty() {
            return Self::defaults();
        }

        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| BenchError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// The built-in configuration.
    pub fn defaults() -> BenchResult<Config> {
        Self::validate(RawConfig::default())
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> BenchResult<Config> {
        let workload = Self::validate_workload(raw.workload)?;
        let container = Self::validate_container(raw.container)?;
        let probe = Self::validate_probe(raw.probe)?;
        let monitor = Self::validate_monitor(raw.monitor)?;
        let microvm = Self::validate_microvm(raw.microvm)?;
        let network = Self::validate_network(raw.network)?;

        let privilege = match raw.privilege.command.trim() {
            "" => None,
            command => Some(command.to_string()),
        };

        Ok(Config {
            workload,
            container,
            probe,
            monitor,
            microvm,
            network,
            privilege,
        })
    }

    fn validate_workload(raw: RawWorkloadConfig) -> BenchResult<WorkloadConfig> {
        let port = Port::new(raw.port)?;

        let entrypoint = match raw.entrypoint {
            None => format!("python3 -m http.server {}", port),
            Some(entrypoint) if entrypoint.trim().is_empty() => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "workload.entrypoint",
                    value: entrypoint,
                    reason: "Entrypoint cannot be empty".to_string(),
                }
                .into());
            }
            Some(entrypoint) => entrypoint,
        };

        Ok(WorkloadConfig { port, entrypoint })
    }

    fn validate_container(raw: RawContainerConfig) -> BenchResult<ContainerConfig> {
        if raw.image_tag.trim().is_empty() || raw.image_tag.contains(char::is_whitespace) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "container.image_tag",
                value: raw.image_tag,
                reason: "Image tag must be non-empty and contain no whitespace".to_string(),
            }
            .into());
        }

        Ok(ContainerConfig {
            image_tag: raw.image_tag,
            stop_timeout: Duration::from_secs(raw.stop_timeout_secs),
        })
    }

    fn validate_probe(raw: RawProbeConfig) -> BenchResult<ProbeConfig> {
        for (field, attempts) in [
            ("probe.container_attempts", raw.container_attempts),
            ("probe.microvm_attempts", raw.microvm_attempts),
        ] {
            if attempts == 0 {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: "0".to_string(),
                    reason: "At least one probe attempt is required".to_string(),
                }
                .into());
            }
        }

        for (field, ms) in [
            ("probe.container_interval_ms", raw.container_interval_ms),
            ("probe.microvm_interval_ms", raw.microvm_interval_ms),
            ("probe.request_timeout_ms", raw.request_timeout_ms),
        ] {
            if ms == 0 {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: "0".to_string(),
                    reason: "Interval must be greater than 0".to_string(),
                }
                .into());
            }
        }

        Ok(ProbeConfig {
            container_attempts: raw.container_attempts,
            container_interval: Duration::from_millis(raw.container_interval_ms),
            microvm_attempts: raw.microvm_attempts,
            microvm_interval: Duration::from_millis(raw.microvm_interval_ms),
            request_timeout: Duration::from_millis(raw.request_timeout_ms),
            strict: raw.strict,
        })
    }

    fn validate_monitor(raw: RawMonitorConfig) -> BenchResult<MonitorWindow> {
        if raw.cadence_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "monitor.cadence_ms",
                value: "0".to_string(),
                reason: "Cadence must be greater than 0".to_string(),
            }
            .into());
        }

        let duration = Duration::from_secs(raw.duration_secs);
        let cadence = Duration::from_millis(raw.cadence_ms);

        if duration < cadence {
            return Err(HardValidationError::InvalidFieldValue {
                field: "monitor.duration_secs",
                value: raw.duration_secs.to_string(),
                reason: format!(
                    "Monitoring window must cover at least one {}ms sample",
                    raw.cadence_ms
                ),
            }
            .into());
        }

        Ok(MonitorWindow { duration, cadence })
    }

    fn validate_microvm(raw: RawMicroVmConfig) -> BenchResult<MicroVmConfig> {
        if raw.vcpu_count == 0 || raw.vcpu_count > 32 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "microvm.vcpu_count",
                value: raw.vcpu_count.to_string(),
                reason: "Must be between 1 and 32".to_string(),
            }
            .into());
        }

        if !(128..=32768).contains(&raw.mem_size_mib) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "microvm.mem_size_mib",
                value: raw.mem_size_mib.to_string(),
                reason: "Must be between 128 and 32768 MiB".to_string(),
            }
            .into());
        }

        for (field, url) in [
            ("microvm.kernel_url", &raw.kernel_url),
            ("microvm.rootfs_url", &raw.rootfs_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: url.clone(),
                    reason: "Asset source must be an HTTP(S) URL".to_string(),
                }
                .into());
            }
        }

        if raw.boot_args.contains("init=") {
            return Err(HardValidationError::InvalidFieldValue {
                field: "microvm.boot_args",
                value: raw.boot_args,
                reason: "init= is set to the injected startup script".to_string(),
            }
            .into());
        }

        Ok(MicroVmConfig {
            hypervisor_bin: PathBuf::from(raw.hypervisor_bin),
            cache_dir: resolve_cache_dir(raw.cache_dir.as_deref()),
            kernel_url: raw.kernel_url,
            rootfs_url: raw.rootfs_url,
            vcpu_count: raw.vcpu_count,
            mem_size_mib: raw.mem_size_mib,
            smt: raw.smt,
            image_headroom_mib: raw.image_headroom_mib,
            boot_args: raw.boot_args,
            stop_grace: Duration::from_millis(raw.stop_grace_ms),
        })
    }

    fn validate_network(raw: RawNetworkConfig) -> BenchResult<NetworkConfig> {
        // Linux interface names are limited to 15 bytes.
        if raw.device.is_empty()
            || raw.device.len() > 15
            || raw.device.contains(|c: char| c.is_whitespace() || c == '/')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "network.device",
                value: raw.device,
                reason: "Must be a valid interface name (1-15 chars, no whitespace or '/')"
                    .to_string(),
            }
            .into());
        }

        let host: Ipv4Cidr = raw.host_cidr.parse()?;
        let guest: Ipv4Cidr = raw.guest_cidr.parse()?;

        if !host.same_subnet(&guest) || host.addr() == guest.addr() {
            return Err(HardValidationError::SubnetMismatch {
                host: host.to_string(),
                guest: guest.to_string(),
            }
            .into());
        }

        Ok(NetworkConfig {
            device: raw.device,
            host,
            guest,
            guest_mac: MacAddress::new(raw.guest_mac)?,
        })
    }
}

/// Expand `~/` and fall back to `~/.firecracker`.
fn resolve_cache_dir(configured: Option<&str>) -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    match configured {
        Some(path) => match path.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => home.join(".firecracker"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
workload:
  port: 9090
  entrypoint: "python3 -m http.server 9090"

container:
  image_tag: bench-app:latest

probe:
  container_attempts: 20
  container_interval_ms: 250
  strict: true

monitor:
  duration_secs: 5
  cadence_ms: 500

microvm:
  cache_dir: /var/cache/vmbench
  vcpu_count: 2
  mem_size_mib: 1024

network:
  device: tap7
  host_cidr: 10.0.7.1/30
  guest_cidr: 10.0.7.2/30

privilege:
  command: ""
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.workload.port.value(), 9090);
        assert_eq!(config.container.image_tag, "bench-app:latest");
        assert_eq!(config.probe.container_attempts, 20);
        assert_eq!(config.probe.container_interval, Duration::from_millis(250));
        assert!(config.probe.strict);
        assert_eq!(config.monitor.duration, Duration::from_secs(5));
        assert_eq!(config.microvm.cache_dir, PathBuf::from("/var/cache/vmbench"));
        assert_eq!(config.microvm.vcpu_count, 2);
        assert_eq!(config.network.device, "tap7");
        assert!(config.privilege.is_none());
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(config.workload.port.value(), 8080);
        assert_eq!(config.probe.container_attempts, 30);
        assert_eq!(config.probe.microvm_attempts, 100);
        assert_eq!(config.monitor.cadence, Duration::from_millis(500));
        assert_eq!(config.microvm.mem_size_mib, 512);
        assert_eq!(config.microvm.image_headroom_mib, 100);
        assert_eq!(config.network.host.to_string(), "172.16.0.1/24");
        assert_eq!(config.network.guest.to_string(), "172.16.0.2/24");
        assert_eq!(config.network.guest_mac.as_str(), "AA:FC:00:00:00:01");
        assert_eq!(config.privilege.as_deref(), Some("sudo"));
        assert!(config.microvm.cache_dir.ends_with(".firecracker"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = ConfigLoader::load_string("probe:\n  strict: true\n").unwrap();
        assert!(config.probe.strict);
        assert_eq!(config.probe.container_attempts, 30);
    }

    #[test]
    fn test_default_entrypoint_follows_port() {
        let config = ConfigLoader::load_string("workload:\n  port: 9000\n").unwrap();
        assert_eq!(config.workload.entrypoint, "python3 -m http.server 9000");

        let config = ConfigLoader::defaults().unwrap();
        assert_eq!(config.workload.entrypoint, "python3 -m http.server 8080");
    }

    #[test]
    fn test_invalid_port_zero() {
        let result = ConfigLoader::load_string("workload:\n  port: 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ConfigLoader::load_string("probe:\n  attempts: 3\n");
        assert!(matches!(result, Err(BenchError::ConfigParse { .. })));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = ConfigLoader::load_string("probe:\n  microvm_attempts: 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_window_shorter_than_cadence_rejected() {
        let yaml = "monitor:\n  duration_secs: 0\n  cadence_ms: 500\n";
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_subnet_mismatch_rejected() {
        let yaml = "network:\n  host_cidr: 172.16.0.1/24\n  guest_cidr: 172.17.0.2/24\n";
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(
            result,
            Err(BenchError::HardValidation(
                HardValidationError::SubnetMismatch { .. }
            ))
        ));
    }

    #[test]
    fn test_init_in_boot_args_rejected() {
        let yaml = "microvm:\n  boot_args: \"console=ttyS0 init=/sbin/init\"\n";
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_memory_bounds() {
        assert!(ConfigLoader::load_string("microvm:\n  mem_size_mib: 64\n").is_err());
        assert!(ConfigLoader::load_string("microvm:\n  vcpu_count: 0\n").is_err());
    }

    #[test]
    fn test_tilde_cache_dir_expanded() {
        let config = ConfigLoader::load_string("microvm:\n  cache_dir: ~/vm-assets\n").unwrap();
        assert!(config.microvm.cache_dir.ends_with("vm-assets"));
        assert!(!config.microvm.cache_dir.starts_with("~"));
    }
}
