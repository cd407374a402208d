//! Summary of a finished run.

use chrono::{DateTime, Utc};
use rollout_core::{JobKind, RunId};
use serde::Serialize;

/// Timing of one successfully executed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub kind: JobKind,
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Result of a successful run. Jobs are listed in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub jobs: Vec<JobOutcome>,
}

impl RunReport {
    pub fn outcome(&self, kind: JobKind, key: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.kind == kind && j.key == key)
    }

    /// Sum of job durations divided by wall-clock time.
    pub fn parallelism(&self) -> f64 {
        if self.duration_ms == 0 {
            return 1.0;
        }
        let busy: u64 = self.jobs.iter().map(|j| j.duration_ms).sum();
        busy as f64 / self.duration_ms as f64
    }
}
