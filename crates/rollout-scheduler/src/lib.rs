//! Job scheduling for rollout.
//!
//! Holds the job registry, emits jobs once their dependencies are done and
//! runs them concurrently, stopping the whole run at the first failure.

pub mod registry;
pub mod report;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use registry::Registry;
pub use report::{JobOutcome, RunReport};
pub use runner::Runner;
pub use scheduler::{CompletionSender, ReadyStream, Scheduler};
