//! `rollout plan`.

use anyhow::Result;
use rollout_scheduler::Registry;
use serde_json::json;
use std::path::Path;

pub fn plan(path: &Path, json: bool) -> Result<()> {
    let (plan, registry) = super::load(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&levels_json(&registry))?);
        return Ok(());
    }

    println!("Plan '{}'", plan.name);
    for (depth, level) in registry.levels().iter().enumerate() {
        println!("Level {}:", depth);
        for &index in level {
            let job = registry.job(index);
            println!("  {:<7} {}", job.kind(), job.key());
        }
    }
    Ok(())
}

fn levels_json(registry: &Registry) -> serde_json::Value {
    let levels: Vec<_> = registry
        .levels()
        .iter()
        .map(|level| {
            level
                .iter()
                .map(|&index| {
                    let job = registry.job(index);
                    json!({ "kind": job.kind(), "key": job.key() })
                })
                .collect::<Vec<_>>()
        })
        .collect();
    json!({ "levels": levels })
}
