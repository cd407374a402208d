//! Core domain types and traits for rollout.
//!
//! This crate contains:
//! - Job status and the pull/build/deploy job variants
//! - Job declarations, the input to registry construction
//! - Backend traits for building, deploying and pulling images
//! - Cancellation signal shared by running jobs
//! - Identifiers, duration helpers and the common error type

pub mod backend;
pub mod cancel;
pub mod error;
pub mod id;
pub mod job;
pub mod status;
pub mod time;

pub use backend::{Backends, ImagePuller, ManifestBackend, ManifestRequest};
pub use cancel::{CancelHandle, CancelSignal};
pub use error::{Error, Result};
pub use id::{JobIndex, RunId};
pub use job::{Job, JobAction, JobDeclaration, JobKind};
pub use status::{Status, StatusCell};
pub use time::duration_ms;
