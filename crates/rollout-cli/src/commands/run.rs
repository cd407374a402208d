//! `rollout run`.

use anyhow::{Context, Result};
use rollout_config::{PullRuntime, RunnerSettings};
use rollout_core::{Backends, ImagePuller};
use rollout_executor::{DockerApiPuller, DryRunBackend, RuntimeCliPuller, SkaffoldBackend};
use rollout_scheduler::{RunReport, Runner};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub async fn run(
    path: &Path,
    dry_run: bool,
    max_parallel: Option<usize>,
    json: bool,
) -> Result<()> {
    let (plan, registry) = super::load(path)?;
    let backends = backends(&plan.settings, dry_run)?.with_env(plan.env.clone());
    info!(
        plan = %plan.name,
        jobs = registry.len(),
        manifests = backends.manifests.name(),
        puller = backends.puller.name(),
        "Loaded plan"
    );

    let mut runner = Runner::new(registry, backends);
    if let Some(limit) = max_parallel.or(plan.settings.max_parallel) {
        runner = runner.with_max_parallel(limit);
    }

    let report = runner
        .run()
        .await
        .with_context(|| format!("plan '{}' failed", plan.name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&plan.name, &report);
    }
    Ok(())
}

/// Pick the backends for the plan's settings.
pub fn backends(settings: &RunnerSettings, dry_run: bool) -> Result<Backends> {
    if dry_run {
        let runtime = match &settings.runtime {
            PullRuntime::Cli(binary) => binary.as_str(),
            PullRuntime::DockerApi => "docker",
        };
        let backend = Arc::new(DryRunBackend::new(&settings.skaffold, runtime));
        return Ok(Backends::new(backend.clone(), backend));
    }

    let puller: Arc<dyn ImagePuller> = match &settings.runtime {
        PullRuntime::Cli(binary) => Arc::new(RuntimeCliPuller::new(binary)),
        PullRuntime::DockerApi => {
            Arc::new(DockerApiPuller::new().context("failed to connect to Docker")?)
        }
    };
    Ok(Backends::new(
        Arc::new(SkaffoldBackend::new(&settings.skaffold)),
        puller,
    ))
}

fn print_summary(name: &str, report: &RunReport) {
    println!(
        "Plan '{}' succeeded: {} jobs in {:.1}s (run {})",
        name,
        report.jobs.len(),
        report.duration_ms as f64 / 1000.0,
        report.run_id
    );
    for job in &report.jobs {
        println!("  {:<7} {:<50} {:>8}ms", job.kind, job.key, job.duration_ms);
    }
}
