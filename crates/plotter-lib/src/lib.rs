//! Library for plotting Reserved-Instance utilization and coverage
//!
//! This crate provides the core functionality for:
//! - Loading the account registry
//! - Assuming per-account roles for cross-account billing queries
//! - Querying and normalizing RI utilization/coverage
//! - Emitting tagged metric points to Datadog
//! - Orchestrating multi-account polling runs
//! - Health checks and observability

pub mod billing;
pub mod credentials;
pub mod emitter;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod secrets;

pub use error::PlotterError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, LastRun, ReadinessResponse,
};
pub use models::*;
pub use observability::{PlotterMetrics, RunLogger};
pub use pipeline::{FailurePolicy, Orchestrator, OrchestratorBuilder, PollConfig, PollLoop, RunReport};
