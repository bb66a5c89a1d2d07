// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vmbench validate` command - Validate configuration file.

use std::path::Path;

use vmbench_core::ConfigLoader;

pub fn execute(file: &Path) -> anyhow::Result<()> {
    tracing::info!(file = %file.display(), "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Workload:");
            println!("  Port:             {}", config.workload.port);
            println!("  Entrypoint:       {}", config.workload.entrypoint);
            println!("  Image Tag:        {}", config.container.image_tag);
            println!();
            println!("Readiness Probe:");
            println!(
                "  Container:        {} attempts every {}ms",
                config.probe.container_attempts,
                config.probe.container_interval.as_millis()
            );
            println!(
                "  MicroVM:          {} attempts every {}ms",
                config.probe.microvm_attempts,
                config.probe.microvm_interval.as_millis()
            );
            println!("  Strict:           {}", config.probe.strict);
            println!();
            println!("Resource Monitoring:");
            println!(
                "  Window:           {}s at {}ms",
                config.monitor.duration.as_secs(),
                config.monitor.cadence.as_millis()
            );
            println!();
            println!("MicroVM:");
            println!(
                "  Hypervisor:       {}",
                config.microvm.hypervisor_bin.display()
            );
            println!(
                "  Machine:          {} vCPU, {} MiB",
                config.microvm.vcpu_count, config.microvm.mem_size_mib
            );
            println!("  Asset Cache:      {}", config.microvm.cache_dir.display());
            println!();
            println!("Network:");
            println!("  Device:           {}", config.network.device);
            println!("  Host:             {}", config.network.host);
            println!("  Guest:            {}", config.network.guest);
            println!("  Guest MAC:        {}", config.network.guest_mac);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
