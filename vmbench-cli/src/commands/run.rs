// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `vmbench run` command - Run the benchmark session.
//!
//! Prepares the workload (cloned repository or default Dockerfile) in a
//! session directory, runs the container and microVM backends through the
//! orchestrator and prints the report. Ctrl-C tears every sandbox down.

use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use vmbench_core::{
    AssetCache, Backend, CommandRunner, CommandSpec, Config, ContainerBackend, MicroVmBackend,
    NetworkFabric, Orchestrator, SystemRunner,
};

use super::load_config;
use crate::render;

pub struct RunOptions {
    pub repo: Option<String>,
    pub monitor: bool,
    pub json: bool,
}

pub async fn execute(config_path: Option<&Path>, options: RunOptions) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let repo = match options.repo {
        Some(repo) => Some(repo),
        None => prompt_repo()?,
    }
    .map(|repo| repo.trim().to_string())
    .filter(|repo| !repo.is_empty());

    let session = tempfile::Builder::new()
        .prefix("vmbench-")
        .tempdir()
        .context("Failed to create session directory")?;
    tracing::info!(session = %session.path().display(), "Created session directory");

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(config.privilege.clone()));

    let workload_dir = session.path().join("workload");
    prepare_workload(runner.as_ref(), repo.as_deref(), &workload_dir, &config).await?;

    let fabric = Arc::new(NetworkFabric::new(runner.clone(), config.network.clone()));
    let cache = AssetCache::from_config(&config.microvm)?;

    let backends: Vec<Box<dyn Backend>> = vec![
        Box::new(ContainerBackend::new(runner.clone(), &config, &workload_dir)),
        Box::new(MicroVmBackend::new(
            runner.clone(),
            &config,
            cache,
            fabric.clone(),
            session.path(),
        )),
    ];

    // Resource usage only makes sense for a real workload unless asked for.
    let monitor = (repo.is_some() || options.monitor).then_some(config.monitor);
    let mut orchestrator = Orchestrator::new(backends, fabric, monitor, config.probe.strict);

    let finished = tokio::select! {
        report = orchestrator.run() => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(report) = finished else {
        eprintln!();
        eprintln!("Interrupted, releasing sandboxes...");
        orchestrator.abort().await;
        anyhow::bail!("Benchmark interrupted");
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        print!("{}", render::render_text(&report));
    }

    Ok(())
}

/// Ask for a repository URL on an interactive terminal.
fn prompt_repo() -> anyhow::Result<Option<String>> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Ok(None);
    }

    print!("Enter Git repository URL (leave empty to use default): ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(Some(line))
}

/// Clone `repo` into `dir`, or write the default workload there.
async fn prepare_workload(
    runner: &dyn CommandRunner,
    repo: Option<&str>,
    dir: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    let dockerfile = dir.join("Dockerfile");

    match repo {
        Some(repo) => {
            println!("Cloning {}...", repo);
            let spec = CommandSpec::new("git")
                .arg("clone")
                .arg(repo)
                .arg(dir.to_string_lossy());
            runner
                .run_checked(&spec)
                .await
                .with_context(|| format!("Failed to clone {}", repo))?;

            if !dockerfile.exists() {
                tracing::warn!(repo = %repo, "Repository has no Dockerfile, using the default");
                std::fs::write(&dockerfile, default_dockerfile(config)?)?;
            }
        }
        None => {
            std::fs::create_dir_all(dir)?;
            std::fs::write(&dockerfile, default_dockerfile(config)?)?;
            println!("Default Dockerfile created at {}", dockerfile.display());
        }
    }

    Ok(())
}

/// Python image serving the build context over HTTP with the configured
/// entrypoint.
fn default_dockerfile(config: &Config) -> anyhow::Result<String> {
    let command: Vec<&str> = config.workload.entrypoint.split_whitespace().collect();
    Ok(format!(
        "FROM python:3.9-slim\n\
         WORKDIR /app\n\
         COPY . /app\n\
         RUN pip install flask\n\
         EXPOSE {}\n\
         CMD {}\n",
        config.workload.port,
        serde_json::to_string(&command)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmbench_core::ConfigLoader;

    #[test]
    fn test_default_dockerfile_uses_workload() {
        let config = ConfigLoader::load_string(
            "workload:\n  port: 9000\n  entrypoint: python3 -m http.server 9000\n",
        )
        .unwrap();

        let dockerfile = default_dockerfile(&config).unwrap();
        assert!(dockerfile.starts_with("FROM python:3.9-slim\n"));
        assert!(dockerfile.contains("EXPOSE 9000\n"));
        assert!(dockerfile.contains(r#"CMD ["python3","-m","http.server","9000"]"#));
    }

    #[tokio::test]
    async fn test_default_workload_written_without_repo() {
        let dir = tempfile::TempDir::new().unwrap();
        let workload = dir.path().join("workload");
        let config = ConfigLoader::defaults().unwrap();

        prepare_workload(&SystemRunner::default(), None, &workload, &config)
            .await
            .unwrap();

        let dockerfile = std::fs::read_to_string(workload.join("Dockerfile")).unwrap();
        assert!(dockerfile.contains("EXPOSE 8080"));
    }
}
