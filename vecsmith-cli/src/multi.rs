//! Multi-seed runs, each in its own `vecsmith run` process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use vecsmith_core::workspace::write_json;

use crate::commands::CliContext;
use crate::{MultiArgs, RunArgs};

pub const MANIFEST_FILE: &str = "runs_manifest.json";

/// One child run, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEntry {
    pub seed: u64,
    pub output_dir: PathBuf,
    /// `None` if the process could not be started or was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub base: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub runs: Vec<RunEntry>,
}

pub fn run_dir(base: &Path, seed: u64) -> PathBuf {
    base.join(format!("seed_{}", seed))
}

/// Arguments for the child `vecsmith run` of `seed`.
pub fn child_args(ctx: &CliContext, run: &RunArgs, seed: u64, output: &Path) -> Vec<String> {
    let mut args = vec![
        "--workspace".to_string(),
        ctx.workspace.display().to_string(),
        "--quiet".to_string(),
    ];
    if let Some(config) = &ctx.config_file {
        args.push("--config".to_string());
        args.push(config.display().to_string());
    }
    args.push("run".to_string());
    if run.all {
        args.push("--all".to_string());
    } else if !run.functions.is_empty() {
        args.push("--functions".to_string());
        args.push(run.functions.join(","));
    }
    if let Some(n) = run.max_iterations {
        args.push("--max-iterations".to_string());
        args.push(n.to_string());
    }
    if let Some(model) = &run.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(provider) = &run.provider {
        args.push("--provider".to_string());
        args.push(provider.clone());
    }
    if let Some(temperature) = run.temperature {
        args.push("--temperature".to_string());
        args.push(temperature.to_string());
    }
    if let Some(source) = &run.source {
        args.push("--source".to_string());
        args.push(source.display().to_string());
    }
    args.push("--seed".to_string());
    args.push(seed.to_string());
    args.push("--output".to_string());
    args.push(output.display().to_string());
    args
}

async fn run_child(exe: PathBuf, args: Vec<String>, seed: u64, output_dir: PathBuf) -> RunEntry {
    let started = Instant::now();
    info!(seed, output = %output_dir.display(), "Starting run");
    let status = Command::new(&exe)
        .args(&args)
        .kill_on_drop(true)
        .status()
        .await;
    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!(seed, error = %e, "Failed to start run");
            None
        }
    };
    let duration_secs = started.elapsed().as_secs_f64();
    info!(seed, ?exit_code, duration_secs, "Run finished");
    RunEntry {
        seed,
        output_dir,
        exit_code,
        duration_secs,
    }
}

pub async fn run_multi(args: MultiArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    let base = if args.base.is_absolute() {
        args.base.clone()
    } else {
        ctx.workspace.join(&args.base)
    };
    std::fs::create_dir_all(&base)?;

    let started_at = Utc::now();
    let permits = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut tasks = JoinSet::new();
    for &seed in &args.seeds {
        let output_dir = run_dir(&base, seed);
        let child = child_args(ctx, &args.run, seed, &output_dir);
        let permits = permits.clone();
        let exe = exe.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            run_child(exe, child, seed, output_dir).await
        });
    }

    let mut runs = Vec::with_capacity(args.seeds.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => runs.push(entry),
            Err(e) => error!(error = %e, "Run task failed"),
        }
    }
    runs.sort_by_key(|r| r.seed);

    let manifest = RunManifest {
        base: base.clone(),
        started_at,
        finished_at: Utc::now(),
        runs,
    };
    let manifest_path = base.join(MANIFEST_FILE);
    write_json(&manifest_path, &manifest)?;

    let failed = manifest
        .runs
        .iter()
        .filter(|r| r.exit_code != Some(0))
        .count();
    println!(
        "{}/{} runs completed, manifest written to {}",
        manifest.runs.len() - failed,
        manifest.runs.len(),
        manifest_path.display()
    );
    if failed > 0 {
        anyhow::bail!("{} of {} runs failed", failed, manifest.runs.len());
    }
    Ok(())
}
