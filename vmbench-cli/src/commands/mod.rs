// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

use std::path::Path;

use anyhow::Context;
use vmbench_core::{Config, ConfigLoader};

pub mod assets;
pub mod cleanup;
pub mod run;
pub mod validate;

/// Load the configuration file, or the built-in defaults without one.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_file(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(ConfigLoader::defaults()?),
    }
}
