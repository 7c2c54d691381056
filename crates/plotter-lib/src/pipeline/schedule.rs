//! Periodic polling loop

use super::{Orchestrator, RunReport};
use crate::error::PlotterError;
use crate::health::{components, HealthRegistry, LastRun};
use crate::models::RunContext;
use crate::observability::{run_outcome, PlotterMetrics, RunLogger};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Configuration for the polling loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Time between the starts of consecutive runs
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

/// Runs the orchestrator on a fixed interval until shutdown
pub struct PollLoop {
    orchestrator: Orchestrator,
    config: PollConfig,
    health: HealthRegistry,
    metrics: PlotterMetrics,
    logger: RunLogger,
}

impl PollLoop {
    pub fn new(
        orchestrator: Orchestrator,
        config: PollConfig,
        health: HealthRegistry,
        metrics: PlotterMetrics,
        logger: RunLogger,
    ) -> Self {
        Self {
            orchestrator,
            config,
            health,
            metrics,
            logger,
        }
    }

    /// Poll immediately, then once per interval until `shutdown` fires.
    ///
    /// A run that overruns the interval delays the next one rather than
    /// overlapping it.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting RI polling loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are already logged, counted and reflected in health.
                    let _ = self.poll_once(Utc::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down RI polling loop");
                    break;
                }
            }
        }
    }

    /// Perform a single run with `now` as the snapshot time
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<RunReport, PlotterError> {
        let ctx = RunContext::new(now);
        self.logger.log_run_started(&ctx);

        let start = Instant::now();
        let result = self.orchestrator.run(&ctx).await;
        let elapsed = start.elapsed();

        self.metrics.observe_run(&result, elapsed);
        self.logger.log_run_finished(&result, elapsed);
        update_health(&self.health, &result).await;

        result
    }
}

/// Reflect the outcome of a run in the health registry
async fn update_health(health: &HealthRegistry, result: &Result<RunReport, PlotterError>) {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            let component = match e.kind() {
                "config_load" => components::REGISTRY,
                _ => components::BILLING,
            };
            health.set_unhealthy(component, e.to_string()).await;
            return;
        }
    };

    health.set_healthy(components::REGISTRY).await;

    let stages = [
        (components::CREDENTIAL_BROKER, report.count_kind("credential")),
        (
            components::BILLING,
            report.count_kind("billing_api") + report.count_kind("data_parse"),
        ),
        (components::EMITTER, report.count_kind("emit")),
    ];

    for (component, failures) in stages {
        if failures == 0 {
            health.set_healthy(component).await;
        } else {
            health
                .set_degraded(component, format!("{} failure(s) in last run", failures))
                .await;
        }
    }

    health
        .record_run(LastRun::new(report, run_outcome(result)))
        .await;
}
