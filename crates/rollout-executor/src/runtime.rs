//! Image pulls through a container runtime CLI.

use crate::process::{CommandLine, ProcessError};
use async_trait::async_trait;
use rollout_core::{CancelSignal, Error, ImagePuller, Result};
use tracing::info;

/// Pulls images with `<runtime> pull <image>`, e.g. `docker` or `podman`.
#[derive(Debug, Clone)]
pub struct RuntimeCliPuller {
    runtime: String,
}

impl RuntimeCliPuller {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    pub fn pull_command(&self, image: &str) -> CommandLine {
        CommandLine::new(&self.runtime).arg("pull").arg(image)
    }
}

#[async_trait]
impl ImagePuller for RuntimeCliPuller {
    fn name(&self) -> &'static str {
        "runtime-cli"
    }

    async fn pull(&self, image: &str, cancel: &CancelSignal) -> Result<()> {
        let command = self.pull_command(image);
        info!(runtime = %self.runtime, image = %image, "Pulling image");
        command
            .run_checked(None, cancel)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                ProcessError::Cancelled => Error::Cancelled,
                other => Error::PullFailed {
                    image: image.to_string(),
                    message: other.to_string(),
                },
            })
    }
}
