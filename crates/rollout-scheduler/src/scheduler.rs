//! Ready-work stream.
//!
//! The scheduler runs as its own task. It first emits every pull, build and
//! root deploy job, then waits for completion reports and emits a deploy job
//! as soon as the last of its dependencies has finished. Every job is marked
//! in progress before it is sent, so no job is handed out twice. Finding a job
//! already claimed by someone else stops the scheduler with an error.

use crate::registry::Registry;
use rollout_core::{Error, JobIndex, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Receiving side of the ready-work stream. Closes once every job was emitted
/// or the scheduler stopped.
#[derive(Debug)]
pub struct ReadyStream {
    rx: mpsc::Receiver<JobIndex>,
}

impl ReadyStream {
    pub async fn recv(&mut self) -> Option<JobIndex> {
        self.rx.recv().await
    }
}

/// Reports successfully completed jobs back to the scheduler.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<JobIndex>,
}

impl CompletionSender {
    /// Report that the job at `index` is done. A stopped scheduler ignores it.
    pub fn report(&self, index: JobIndex) {
        if self.tx.send(index).is_err() {
            debug!(job = %index, "Scheduler already stopped; completion ignored");
        }
    }
}

/// Emits registered jobs in dependency order.
pub struct Scheduler {
    registry: Arc<Registry>,
    /// Unfinished dependencies per job, indexed like the registry arena.
    pending: Vec<usize>,
    emitted: usize,
}

impl Scheduler {
    /// Capacity of the ready-work channel.
    pub const DEFAULT_CAPACITY: usize = 16;

    pub fn new(registry: Arc<Registry>) -> Self {
        let pending = registry
            .jobs()
            .iter()
            .map(|job| job.dependencies().len())
            .collect();
        Self {
            registry,
            pending,
            emitted: 0,
        }
    }

    /// Start the scheduler task.
    ///
    /// The task ends with an error only if a job it tried to emit had already
    /// been claimed. A runner that stops early is not an error.
    pub fn spawn(
        self,
        capacity: usize,
    ) -> (ReadyStream, CompletionSender, JoinHandle<Result<()>>) {
        let (ready_tx, ready_rx) = mpsc::channel(capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(ready_tx, done_rx));
        (
            ReadyStream { rx: ready_rx },
            CompletionSender { tx: done_tx },
            handle,
        )
    }

    async fn run(
        mut self,
        ready: mpsc::Sender<JobIndex>,
        mut completions: mpsc::UnboundedReceiver<JobIndex>,
    ) -> Result<()> {
        let registry = self.registry.clone();
        let initial = registry
            .pulls()
            .iter()
            .chain(registry.builds())
            .chain(registry.roots());
        for &index in initial {
            if !self.emit(index, &ready).await? {
                return Ok(());
            }
        }

        while self.emitted < registry.len() {
            let Some(done) = completions.recv().await else {
                debug!(
                    emitted = self.emitted,
                    total = registry.len(),
                    "Runner stopped before all jobs were scheduled"
                );
                return Ok(());
            };

            for index in self.release(done) {
                if !self.emit(index, &ready).await? {
                    return Ok(());
                }
            }
        }

        debug!(total = registry.len(), "All jobs scheduled");
        Ok(())
    }

    /// Account for a finished job and return the dependents it unblocked.
    fn release(&mut self, done: JobIndex) -> Vec<JobIndex> {
        let registry = &self.registry;
        let mut unblocked = Vec::new();
        for &dependent in registry.dependents(done) {
            let pending = &mut self.pending[dependent.get()];
            *pending = pending.saturating_sub(1);
            if *pending == 0 && registry.job(dependent).is_ready(registry.jobs()) {
                unblocked.push(dependent);
            }
        }
        unblocked
    }

    /// Claim and send one job. Returns `false` once the consumer is gone.
    async fn emit(&mut self, index: JobIndex, ready: &mpsc::Sender<JobIndex>) -> Result<bool> {
        let job = self.registry.job(index);
        if !job.mark_in_progress() {
            error!(job = %job.key(), status = %job.status(), "Job already claimed");
            return Err(Error::Internal(format!(
                "{} job '{}' was already {} when it was scheduled",
                job.kind(),
                job.key(),
                job.status()
            )));
        }
        debug!(kind = %job.kind(), job = %job.key(), "Job ready");
        if ready.send(index).await.is_err() {
            debug!("Ready stream dropped; stopping scheduler");
            return Ok(false);
        }
        self.emitted += 1;
        Ok(true)
    }
}
