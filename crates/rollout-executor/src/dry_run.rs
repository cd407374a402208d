//! Backend that logs instead of running anything.

use crate::runtime::RuntimeCliPuller;
use crate::skaffold::SkaffoldBackend;
use async_trait::async_trait;
use rollout_core::{
    CancelSignal, Error, ImagePuller, ManifestBackend, ManifestRequest, Result,
};
use tracing::{debug, info};

/// Logs the commands a real run would execute and succeeds immediately.
#[derive(Debug, Clone)]
pub struct DryRunBackend {
    skaffold: SkaffoldBackend,
    puller: RuntimeCliPuller,
}

impl DryRunBackend {
    pub fn new(skaffold: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            skaffold: SkaffoldBackend::new(skaffold),
            puller: RuntimeCliPuller::new(runtime),
        }
    }

    fn check(cancel: &CancelSignal) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl Default for DryRunBackend {
    fn default() -> Self {
        Self::new("skaffold", "docker")
    }
}

#[async_trait]
impl ManifestBackend for DryRunBackend {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn build(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()> {
        Self::check(cancel)?;
        info!(command = %self.skaffold.build_command(request), "Would run");
        debug!(env = ?request.env_pairs(), "Would pass environment");
        Ok(())
    }

    async fn deploy(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()> {
        Self::check(cancel)?;
        info!(command = %self.skaffold.deploy_command(request), "Would run");
        debug!(env = ?request.env_pairs(), "Would pass environment");
        Ok(())
    }
}

#[async_trait]
impl ImagePuller for DryRunBackend {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn pull(&self, image: &str, cancel: &CancelSignal) -> Result<()> {
        Self::check(cancel)?;
        info!(command = %self.puller.pull_command(image), "Would run");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_core::CancelHandle;

    #[tokio::test]
    async fn test_never_executes() {
        // The binaries do not exist; a dry run must not try to start them.
        let backend = DryRunBackend::new("rollout-missing-skaffold", "rollout-missing-runtime");
        let request = ManifestRequest {
            file: "a.yaml".to_string(),
            ..Default::default()
        };
        let never = CancelSignal::never();
        backend.build(&request, &never).await.unwrap();
        backend.deploy(&request, &never).await.unwrap();
        backend.pull("postgres:13", &never).await.unwrap();
    }

    #[tokio::test]
    async fn test_respects_cancellation() {
        let handle = CancelHandle::new();
        handle.cancel();
        let res = DryRunBackend::default()
            .pull("postgres:13", &handle.signal())
            .await;
        assert_eq!(res, Err(Error::Cancelled));
    }
}
