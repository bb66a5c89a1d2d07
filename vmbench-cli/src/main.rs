// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! vmbench CLI
//!
//! Command-line interface for the container versus microVM cold-start
//! benchmark.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod render;

/// vmbench - Cold-start and resource benchmark for containers and microVMs
#[derive(Parser)]
#[command(name = "vmbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (built-in defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the benchmark session
    Run {
        /// Git repository to benchmark (prompted for when omitted)
        #[arg(short, long)]
        repo: Option<String>,

        /// Also run the resource usage pass with the default workload
        #[arg(short, long)]
        monitor: bool,

        /// Print the session report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },

    /// Download the kernel and base rootfs into the cache
    Assets,

    /// Remove a tap device left behind by an interrupted run
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            repo,
            monitor,
            json,
        } => {
            commands::run::execute(
                config,
                commands::run::RunOptions {
                    repo,
                    monitor,
                    json,
                },
            )
            .await
        }
        Commands::Validate { file } => commands::validate::execute(&file),
        Commands::Assets => commands::assets::execute(config).await,
        Commands::Cleanup => commands::cleanup::execute(config).await,
    }
}
