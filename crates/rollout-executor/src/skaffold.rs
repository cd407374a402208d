//! skaffold manifest backend.

use crate::process::{CommandLine, ProcessError};
use async_trait::async_trait;
use rollout_core::{CancelSignal, Error, ManifestBackend, ManifestRequest, Result};
use tracing::info;

/// Builds and deploys manifests by shelling out to skaffold.
#[derive(Debug, Clone)]
pub struct SkaffoldBackend {
    binary: String,
}

impl SkaffoldBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `skaffold build -f <file> [--file-output <path>] <args...>`
    pub fn build_command(&self, request: &ManifestRequest) -> CommandLine {
        let mut command = CommandLine::new(&self.binary)
            .args(["build", "-f"])
            .arg(&request.file);
        if let Some(output) = &request.output {
            command = command
                .arg("--file-output")
                .arg(output.display().to_string());
        }
        command.args(&request.args)
    }

    /// `skaffold run -f <file> <args...>`
    pub fn deploy_command(&self, request: &ManifestRequest) -> CommandLine {
        CommandLine::new(&self.binary)
            .args(["run", "-f"])
            .arg(&request.file)
            .args(&request.args)
    }

    async fn invoke(
        &self,
        command: CommandLine,
        request: &ManifestRequest,
        cancel: &CancelSignal,
    ) -> Result<()> {
        info!(command = %command, "Running skaffold");
        command
            .run_checked(Some(&request.env), cancel)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                ProcessError::Cancelled => Error::Cancelled,
                other => Error::ExecutionFailed {
                    job: request.file.clone(),
                    message: other.to_string(),
                },
            })
    }
}

impl Default for SkaffoldBackend {
    fn default() -> Self {
        Self::new("skaffold")
    }
}

#[async_trait]
impl ManifestBackend for SkaffoldBackend {
    fn name(&self) -> &'static str {
        "skaffold"
    }

    async fn build(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()> {
        self.invoke(self.build_command(request), request, cancel)
            .await
    }

    async fn deploy(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()> {
        self.invoke(self.deploy_command(request), request, cancel)
            .await
    }
}
