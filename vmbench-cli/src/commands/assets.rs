// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vmbench assets` command - Pre-fetch microVM boot assets.

use std::path::Path;

use vmbench_core::{AssetCache, AssetKind};

use super::load_config;

pub async fn execute(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let cache = AssetCache::from_config(&config.microvm)?;

    tracing::info!(root = %cache.root().display(), "Checking asset cache");

    for status in cache.status().await {
        if status.cached {
            println!("✓ {} cached at {}", status.kind, status.path.display());
        }
    }

    for kind in AssetKind::ALL {
        let path = cache.ensure(kind).await?;
        println!("  {:<12} {}", kind.to_string(), path.display());
    }

    Ok(())
}
