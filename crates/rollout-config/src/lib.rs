//! KDL configuration parsing for rollout.
//!
//! A plan file declares the pull, build and deploy jobs of a run, in order,
//! together with runner settings and environment overrides.

pub mod error;
pub mod plan;

pub use error::{ConfigError, ConfigResult};
pub use plan::{Plan, PullRuntime, RunnerSettings, load_plan, parse_plan};
