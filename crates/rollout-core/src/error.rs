//! Error types for rollout.

use thiserror::Error;

use crate::job::JobKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("duplicate {kind} job: {name}")]
    DuplicateName { kind: JobKind, name: String },

    #[error("deploy job '{job}' depends on unknown deploy job '{dependency}'")]
    UnresolvedDependency { job: String, dependency: String },

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("job '{job}' failed: {message}")]
    ExecutionFailed { job: String, message: String },

    #[error("failed to pull image '{image}': {message}")]
    PullFailed { image: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error was raised while building the registry.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Error::DuplicateName { .. }
                | Error::UnresolvedDependency { .. }
                | Error::UnknownJobType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
