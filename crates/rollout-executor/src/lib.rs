//! Job execution backends for rollout.
//!
//! Provides implementations of the core backend traits:
//! - skaffold for manifest builds and deploys
//! - a container runtime CLI (`docker`, `podman`) for image pulls
//! - the Docker Engine API for image pulls without a CLI
//! - a dry-run backend that only logs what would run

pub mod docker;
pub mod dry_run;
pub mod process;
pub mod runtime;
pub mod skaffold;

pub use docker::DockerApiPuller;
pub use dry_run::DryRunBackend;
pub use process::{CommandLine, ProcessError, ProcessOutput};
pub use runtime::RuntimeCliPuller;
pub use skaffold::SkaffoldBackend;
