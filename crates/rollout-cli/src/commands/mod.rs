//! CLI command implementations.

pub mod plan;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use rollout_config::Plan;
use rollout_scheduler::Registry;
use std::path::Path;

/// Load a plan file and register its jobs.
pub fn load(path: &Path) -> Result<(Plan, Registry)> {
    let plan = rollout_config::load_plan(path)
        .with_context(|| format!("failed to load plan {}", path.display()))?;
    let registry = Registry::new(plan.declarations.clone())
        .with_context(|| format!("invalid plan '{}'", plan.name))?;
    Ok((plan, registry))
}

#[cfg(test)]
pub(crate) fn write_plan(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "rollout-{}-{}.kdl",
        name,
        std::process::id()
    ));
    std::fs::write(&path, contents).unwrap();
    path
}
