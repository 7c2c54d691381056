//! Health of the polling stages
//!
//! Each run updates one entry per stage (registry, credential broker,
//! billing queries, metric emission) and records a summary of itself.
//! The service is ready once a run has completed and no stage is unhealthy.

use crate::pipeline::RunReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stage names, in pipeline order
pub mod components {
    pub const REGISTRY: &str = "registry";
    pub const CREDENTIAL_BROKER: &str = "credential_broker";
    pub const BILLING: &str = "billing";
    pub const EMITTER: &str = "emitter";

    pub const ALL: [&str; 4] = [REGISTRY, CREDENTIAL_BROKER, BILLING, EMITTER];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Some accounts or services failed in the last run
    Degraded,
    /// The stage cannot run at all
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Summary of the last completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    /// Snapshot timestamp shared by every point of the run
    pub snapshot: f64,
    pub outcome: String,
    pub accounts: usize,
    pub failed_accounts: usize,
    pub points_emitted: usize,
}

impl LastRun {
    pub fn new(report: &RunReport, outcome: &str) -> Self {
        Self {
            snapshot: report.snapshot,
            outcome: outcome.to_string(),
            accounts: report.accounts.len(),
            failed_accounts: report.failed_accounts(),
            points_emitted: report.points_emitted(),
        }
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across all stages
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    last_run: Option<LastRun>,
}

/// Shared stage health, cloned into the poll loop and the API server
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every stage as healthy
    pub async fn register_all(&self) {
        for name in components::ALL {
            self.register(name).await;
        }
    }

    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        state
            .components
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    /// Record a completed run; the first one makes the service ready
    pub async fn record_run(&self, run: LastRun) {
        self.state.write().await.last_run = Some(run);
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
            last_run: state.last_run.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();

        let reason = if state.last_run.is_none() {
            Some("First polling run not yet completed".to_string())
        } else if !unhealthy.is_empty() {
            Some(format!("Unhealthy stage: {}", unhealthy.join(", ")))
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
