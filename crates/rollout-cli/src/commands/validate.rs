//! `rollout validate`.

use anyhow::Result;
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    let (plan, registry) = super::load(path)?;
    println!(
        "Plan '{}' is valid: {} pulls, {} builds, {} deploys",
        plan.name,
        registry.pulls().len(),
        registry.builds().len(),
        registry.deploys().len()
    );
    Ok(())
}
