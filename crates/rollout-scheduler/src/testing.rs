//! Scripted backend for scheduler and runner tests.

use async_trait::async_trait;
use rollout_core::{
    Backends, CancelSignal, Error, ImagePuller, ManifestBackend, ManifestRequest, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend whose calls sleep and fail as scripted, recording what happened.
///
/// Calls are identified as `"build <file>"`, `"deploy <file>"` or `"pull <image>"`.
/// A scripted pull failure is reported as [`Error::PullFailed`].
#[derive(Default)]
pub struct ScriptedBackend {
    delays: HashMap<String, Duration>,
    failures: HashMap<String, String>,
    events: Mutex<Vec<String>>,
    finished: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedBackend {
    pub fn delay(mut self, call: &str, millis: u64) -> Self {
        self.delays
            .insert(call.to_string(), Duration::from_millis(millis));
        self
    }

    pub fn fail(mut self, call: &str, message: &str) -> Self {
        self.failures.insert(call.to_string(), message.to_string());
        self
    }

    pub fn backends(self) -> Backends {
        self.shared().1
    }

    pub fn shared(self) -> (Arc<Self>, Backends) {
        let backend = Arc::new(self);
        let backends = Backends::new(backend.clone(), backend.clone());
        (backend, backends)
    }

    /// `"start <call>"` / `"end <call>"` entries in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Calls that returned, successfully or not.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// Calls currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    async fn call(&self, call: String, cancel: &CancelSignal) -> Result<()> {
        self.events.lock().unwrap().push(format!("start {}", call));
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = self.delays.get(&call).copied().unwrap_or_default();
        let result = tokio::select! {
            _ = tokio::time::sleep(delay) => match self.failures.get(&call) {
                Some(message) => Err(match call.strip_prefix("pull ") {
                    Some(image) => Error::PullFailed {
                        image: image.to_string(),
                        message: message.clone(),
                    },
                    None => Error::ExecutionFailed {
                        job: call.clone(),
                        message: message.clone(),
                    },
                }),
                None => Ok(()),
            },
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("end {}", call));
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ManifestBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn build(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()> {
        self.call(format!("build {}", request.file), cancel).await
    }

    async fn deploy(&self, request: &ManifestRequest, cancel: &CancelSignal) -> Result<()> {
        self.call(format!("deploy {}", request.file), cancel).await
    }
}

#[async_trait]
impl ImagePuller for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn pull(&self, image: &str, cancel: &CancelSignal) -> Result<()> {
        self.call(format!("pull {}", image), cancel).await
    }
}
