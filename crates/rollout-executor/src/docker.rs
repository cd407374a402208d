//! Image pulls through the Docker Engine API.

use async_trait::async_trait;
use bollard::Docker;
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use rollout_core::{CancelSignal, Error, ImagePuller, Result};
use tracing::{debug, info};

/// Pulls images from the local Docker daemon without a CLI.
pub struct DockerApiPuller {
    docker: Docker,
}

impl DockerApiPuller {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Split an image reference into the `fromImage` and `tag` the Engine API
/// expects. An untagged reference means `latest`; a digest reference is
/// passed through whole.
fn split_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

#[async_trait]
impl ImagePuller for DockerApiPuller {
    fn name(&self) -> &'static str {
        "docker-api"
    }

    async fn pull(&self, image: &str, cancel: &CancelSignal) -> Result<()> {
        let (from_image, tag) = split_reference(image);
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);

        loop {
            let next = tokio::select! {
                next = pull_stream.next() => next,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };
            match next {
                Some(Ok(progress)) => {
                    if let Some(message) = progress.error {
                        return Err(Error::PullFailed {
                            image: image.to_string(),
                            message,
                        });
                    }
                    if let Some(status) = progress.status {
                        debug!(image = %image, status = %status, "Pull progress");
                    }
                }
                Some(Err(e)) => {
                    return Err(Error::PullFailed {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
                None => break,
            }
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}
