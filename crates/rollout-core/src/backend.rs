//! Backend traits for the work a job performs.
//!
//! The orchestration core only cares whether a backend call succeeded. What
//! "build", "deploy" and "pull" actually mean is decided by the implementations
//! (skaffold, a container runtime CLI, the Docker Engine API, ...).

use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::Result;
use crate::cancel::CancelSignal;

/// A build or deploy invocation for a single manifest file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRequest {
    /// Manifest filename, as declared.
    pub file: String,
    /// Extra backend arguments.
    pub args: Vec<String>,
    /// Where a build places its artifact description, if anywhere.
    pub output: Option<PathBuf>,
    /// Environment snapshot for the invocation.
    pub env: HashMap<String, String>,
}

impl ManifestRequest {
    /// The environment in `KEY=value` form, sorted by key.
    pub fn env_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        pairs
    }
}

/// Builds artifacts from and deploys manifests.
#[async_trait]
pub trait ManifestBackend: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Build the artifacts described by a manifest.
    async fn build(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()>;

    /// Deploy a manifest to the cluster.
    async fn deploy(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()>;
}

/// Pulls container images into the local runtime.
#[async_trait]
pub trait ImagePuller: Send + Sync {
    /// Name of this puller.
    fn name(&self) -> &'static str;

    /// Pull one fully-qualified image reference.
    async fn pull(&self, image: &str, cancel: &CancelSignal) -> Result<()>;
}

/// Everything a job needs to execute.
#[derive(Clone)]
pub struct Backends {
    pub manifests: Arc<dyn ManifestBackend>,
    pub puller: Arc<dyn ImagePuller>,
    /// Overrides layered on top of the process environment.
    pub env: HashMap<String, String>,
}

impl Backends {
    pub fn new(manifests: Arc<dyn ManifestBackend>, puller: Arc<dyn ImagePuller>) -> Self {
        Self {
            manifests,
            puller,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Snapshot the current process environment with the overrides applied.
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = unicode_vars(std::env::vars_os());
        env.extend(self.env.clone());
        env
    }
}

/// Keep the variables that are valid Unicode. The others cannot be carried in
/// a [`ManifestRequest`] and are left out of the snapshot.
fn unicode_vars<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let key = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
                debug!(%key, "Skipping environment variable that is not valid Unicode");
                None
            }
        })
        .collect()
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("manifests", &self.manifests.name())
            .field("puller", &self.puller.name())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}
