//! Polling pipeline
//!
//! The [`Orchestrator`] performs one full pass over the account registry;
//! [`PollLoop`] repeats it on an interval until shutdown.

mod orchestrator;
mod report;
mod schedule;

#[cfg(test)]
mod tests;

pub use orchestrator::{FailurePolicy, Orchestrator, OrchestratorBuilder, OrchestratorConfig};
pub use report::{AccountReport, RunReport, ServiceReport};
pub use schedule::{PollConfig, PollLoop};
