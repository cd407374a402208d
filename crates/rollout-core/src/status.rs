//! Job lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;

/// Lifecycle of a job within one run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    NotStarted,
    InProgress,
    Done,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotStarted => write!(f, "not started"),
            Status::InProgress => write!(f, "in progress"),
            Status::Done => write!(f, "done"),
        }
    }
}

/// A status guarded by its own lock.
///
/// The scheduler claims a job with [`StatusCell::mark_in_progress`] before handing
/// it to a worker; the job itself calls [`StatusCell::mark_done`] once it has
/// succeeded. Neither call can move the status backwards.
#[derive(Debug)]
pub struct StatusCell {
    inner: RwLock<Status>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Status::NotStarted),
        }
    }

    pub fn get(&self) -> Status {
        // A poisoned lock still holds a valid enum value.
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_done(&self) -> bool {
        self.get() == Status::Done
    }

    /// Claim the job for execution. Returns `false` if it was already claimed.
    pub fn mark_in_progress(&self) -> bool {
        let mut status = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if *status == Status::NotStarted {
            *status = Status::InProgress;
            true
        } else {
            false
        }
    }

    pub fn mark_done(&self) {
        let mut status = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *status = Status::Done;
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_not_started() {
        let cell = StatusCell::new();
        assert_eq!(cell.get(), Status::NotStarted);
        assert!(!cell.is_done());
    }

    #[test]
    fn test_claim_only_once() {
        let cell = StatusCell::new();
        assert!(cell.mark_in_progress());
        assert!(!cell.mark_in_progress());
        assert_eq!(cell.get(), Status::InProgress);
    }

    #[test]
    fn test_done_never_regresses() {
        let cell = StatusCell::new();
        cell.mark_in_progress();
        cell.mark_done();
        assert!(!cell.mark_in_progress());
        assert_eq!(cell.get(), Status::Done);
    }

    #[test]
    fn test_status_ordering_matches_lifecycle() {
        assert!(Status::NotStarted < Status::InProgress);
        assert!(Status::InProgress < Status::Done);
    }
}
