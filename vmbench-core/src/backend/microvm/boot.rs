// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Hypervisor boot configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{MicroVmConfig, NetworkConfig};
use crate::error::BackendError;
use crate::image::STARTUP_SCRIPT_PATH;

/// Drive id of the root block device.
pub const ROOT_DRIVE_ID: &str = "rootfs";

/// Guest-side name of the only network interface.
pub const GUEST_IFACE: &str = "eth0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootSource {
    pub kernel_image_path: PathBuf,
    pub boot_args: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub vcpu_count: u8,
    pub mem_size_mib: u32,
    pub smt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub iface_id: String,
    pub guest_mac: String,
    pub host_dev_name: String,
}

/// Complete `--config-file` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootConfig {
    #[serde(rename = "boot-source")]
    pub boot_source: BootSource,
    pub drives: Vec<Drive>,
    #[serde(rename = "machine-config")]
    pub machine_config: MachineConfig,
    #[serde(rename = "network-interfaces")]
    pub network_interfaces: Vec<NetworkInterface>,
}

impl BootConfig {
    /// Boot `kernel` with `rootfs` as the writable root drive, running the
    /// injected startup script as init.
    pub fn new(kernel: &Path, rootfs: &Path, vm: &MicroVmConfig, network: &NetworkConfig) -> Self {
        Self {
            boot_source: BootSource {
                kernel_image_path: kernel.to_path_buf(),
                boot_args: format!("{} init={}", vm.boot_args.trim(), STARTUP_SCRIPT_PATH),
            },
            drives: vec![Drive {
                drive_id: ROOT_DRIVE_ID.to_string(),
                path_on_host: rootfs.to_path_buf(),
                is_root_device: true,
                is_read_only: false,
            }],
            machine_config: MachineConfig {
                vcpu_count: vm.vcpu_count,
                mem_size_mib: vm.mem_size_mib,
                smt: vm.smt,
            },
            network_interfaces: vec![NetworkInterface {
                iface_id: GUEST_IFACE.to_string(),
                guest_mac: network.guest_mac.as_str().to_string(),
                host_dev_name: network.device.clone(),
            }],
        }
    }

    /// Serialize to pretty JSON at `path`.
    pub async fn write(&self, path: &Path) -> Result<(), BackendError> {
        let boot_err = |reason: String| BackendError::BootConfig {
            path: path.to_path_buf(),
            reason,
        };

        let json = serde_json::to_vec_pretty(self).map_err(|e| boot_err(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| boot_err(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    #[test]
    fn test_wire_format() {
        let config = ConfigLoader::defaults().unwrap();
        let boot = BootConfig::new(
            Path::new("/cache/vmlinux.bin"),
            Path::new("/run/rootfs.ext4"),
            &config.microvm,
            &config.network,
        );

        let value = serde_json::to_value(&boot).unwrap();
        assert_eq!(
            value["boot-source"]["boot_args"],
            "console=ttyS0 reboot=k panic=1 pci=off init=/root/startup.sh"
        );
        assert_eq!(value["boot-source"]["kernel_image_path"], "/cache/vmlinux.bin");
        assert_eq!(value["drives"][0]["drive_id"], "rootfs");
        assert_eq!(value["drives"][0]["path_on_host"], "/run/rootfs.ext4");
        assert_eq!(value["drives"][0]["is_root_device"], true);
        assert_eq!(value["drives"][0]["is_read_only"], false);
        assert_eq!(value["machine-config"]["vcpu_count"], 1);
        assert_eq!(value["machine-config"]["mem_size_mib"], 512);
        assert_eq!(value["machine-config"]["smt"], false);
        assert_eq!(value["network-interfaces"][0]["iface_id"], "eth0");
        assert_eq!(value["network-interfaces"][0]["guest_mac"], "AA:FC:00:00:00:01");
        assert_eq!(value["network-interfaces"][0]["host_dev_name"], "tap0");
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ConfigLoader::defaults().unwrap();
        let boot = BootConfig::new(
            Path::new("/cache/vmlinux.bin"),
            Path::new("/run/rootfs.ext4"),
            &config.microvm,
            &config.network,
        );
        let path = dir.path().join("vm_config.json");

        boot.write(&path).await.unwrap();

        let parsed: BootConfig =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed, boot);
    }
}
