//! Job declarations and the jobs built from them.
//!
//! Three kinds of job exist:
//! - `pull`: pulls a list of base images into the local container runtime
//! - `build`: builds the artifacts described by a manifest file
//! - `deploy`: deploys a manifest file, optionally after other deploys
//!
//! Pull and build jobs have no dependencies and are always ready. A deploy job
//! is ready once every deploy job it depends on is [`Status::Done`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

use crate::backend::{Backends, ManifestRequest};
use crate::cancel::CancelSignal;
use crate::id::JobIndex;
use crate::status::{Status, StatusCell};
use crate::time::duration_ms;
use crate::{Error, Result};

/// The collection a job belongs to. Names are unique per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Pull,
    Build,
    Deploy,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            JobKind::Pull => "pull",
            JobKind::Build => "build",
            JobKind::Deploy => "deploy",
        })
    }
}

impl std::str::FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pull" => Ok(JobKind::Pull),
            "build" => Ok(JobKind::Build),
            "deploy" => Ok(JobKind::Deploy),
            other => Err(Error::UnknownJobType(other.to_string())),
        }
    }
}

/// A job as declared by the caller, before registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDeclaration {
    Pull {
        name: String,
        images: Vec<String>,
    },
    Build {
        file: String,
        output: Option<PathBuf>,
        args: Vec<String>,
    },
    Deploy {
        file: String,
        depends_on: Vec<String>,
        args: Vec<String>,
    },
}

impl JobDeclaration {
    pub fn pull(name: impl Into<String>, images: Vec<String>) -> Self {
        JobDeclaration::Pull {
            name: name.into(),
            images,
        }
    }

    pub fn build(file: impl Into<String>) -> Self {
        JobDeclaration::Build {
            file: file.into(),
            output: None,
            args: Vec::new(),
        }
    }

    pub fn deploy(file: impl Into<String>, depends_on: &[&str]) -> Self {
        JobDeclaration::Deploy {
            file: file.into(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            args: Vec::new(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobDeclaration::Pull { .. } => JobKind::Pull,
            JobDeclaration::Build { .. } => JobKind::Build,
            JobDeclaration::Deploy { .. } => JobKind::Deploy,
        }
    }

    /// Name of a pull job, filename of a build or deploy job.
    pub fn key(&self) -> &str {
        match self {
            JobDeclaration::Pull { name, .. } => name,
            JobDeclaration::Build { file, .. } | JobDeclaration::Deploy { file, .. } => file,
        }
    }
}

/// What a registered job does when executed.
#[derive(Debug)]
pub enum JobAction {
    Pull {
        images: Vec<String>,
    },
    Build {
        output: Option<PathBuf>,
        args: Vec<String>,
    },
    Deploy {
        depends_on: Vec<String>,
        /// Resolved positions of `depends_on` in the registry.
        dependencies: Vec<JobIndex>,
        args: Vec<String>,
    },
}

/// A registered unit of work with its own status.
#[derive(Debug)]
pub struct Job {
    key: String,
    action: JobAction,
    status: StatusCell,
}

impl Job {
    pub fn pull(name: impl Into<String>, images: Vec<String>) -> Self {
        Self::with_action(name, JobAction::Pull { images })
    }

    pub fn build(file: impl Into<String>, output: Option<PathBuf>, args: Vec<String>) -> Self {
        Self::with_action(file, JobAction::Build { output, args })
    }

    pub fn deploy(
        file: impl Into<String>,
        depends_on: Vec<String>,
        dependencies: Vec<JobIndex>,
        args: Vec<String>,
    ) -> Self {
        Self::with_action(
            file,
            JobAction::Deploy {
                depends_on,
                dependencies,
                args,
            },
        )
    }

    fn with_action(key: impl Into<String>, action: JobAction) -> Self {
        Self {
            key: key.into(),
            action,
            status: StatusCell::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> JobKind {
        match self.action {
            JobAction::Pull { .. } => JobKind::Pull,
            JobAction::Build { .. } => JobKind::Build,
            JobAction::Deploy { .. } => JobKind::Deploy,
        }
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Claim this job for a worker. Returns `false` if it was already claimed.
    pub fn mark_in_progress(&self) -> bool {
        self.status.mark_in_progress()
    }

    /// Resolved dependencies; empty for pull and build jobs.
    pub fn dependencies(&self) -> &[JobIndex] {
        match &self.action {
            JobAction::Deploy { dependencies, .. } => dependencies,
            _ => &[],
        }
    }

    /// Whether every dependency has completed. `arena` is the registry's job list.
    pub fn is_ready(&self, arena: &[Job]) -> bool {
        self.dependencies().iter().all(|dep| {
            arena
                .get(dep.get())
                .map(|job| job.status.is_done())
                .unwrap_or(false)
        })
    }

    /// Run the job against the given backends and mark it done on success.
    pub async fn execute(&self, backends: &Backends, cancel: &CancelSignal) -> Result<()> {
        let kind = self.kind();
        info!(%kind, job = %self.key, "Starting job");
        let started = Instant::now();

        let result = match &self.action {
            JobAction::Pull { images } => self.pull_all(images, backends, cancel).await,
            JobAction::Build { output, args } => {
                let request = self.request(output.clone(), args, backends);
                backends.manifests.build(&request, cancel).await
            }
            JobAction::Deploy { args, .. } => {
                let request = self.request(None, args, backends);
                backends.manifests.deploy(&request, cancel).await
            }
        };

        let elapsed_ms = duration_ms(started.elapsed());
        match result {
            Ok(()) => {
                self.status.mark_done();
                info!(%kind, job = %self.key, elapsed_ms, "Job completed");
                Ok(())
            }
            Err(e) => {
                error!(%kind, job = %self.key, elapsed_ms, error = %e, "Job failed");
                Err(e)
            }
        }
    }

    async fn pull_all(
        &self,
        images: &[String],
        backends: &Backends,
        cancel: &CancelSignal,
    ) -> Result<()> {
        // Images pulled before a failure are left in place.
        for image in images {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            info!(job = %self.key, %image, puller = backends.puller.name(), "Pulling image");
            backends.puller.pull(image, cancel).await?;
        }
        Ok(())
    }

    fn request(
        &self,
        output: Option<PathBuf>,
        args: &[String],
        backends: &Backends,
    ) -> ManifestRequest {
        ManifestRequest {
            file: self.key.clone(),
            args: args.to_vec(),
            output,
            env: backends.environment(),
        }
    }
}
