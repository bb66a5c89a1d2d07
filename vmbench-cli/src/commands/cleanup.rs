// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vmbench cleanup` command - Release a leftover tap device.

use std::path::Path;
use std::sync::Arc;

use vmbench_core::{NetworkFabric, SystemRunner};

use super::load_config;

pub async fn execute(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let runner = Arc::new(SystemRunner::new(config.privilege.clone()));
    let fabric = NetworkFabric::new(runner, config.network);

    if fabric.link_exists().await {
        fabric.release_link().await;
        println!("✓ Removed {}", fabric.device());
    } else {
        println!("Nothing to clean up: {} does not exist", fabric.device());
    }

    Ok(())
}
