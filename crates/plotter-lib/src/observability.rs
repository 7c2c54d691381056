//! Observability infrastructure for the RI plotter
//!
//! Provides:
//! - Prometheus metrics (run duration, points emitted, errors by kind)
//! - Structured JSON logging with tracing

use crate::error::PlotterError;
use crate::models::RunContext;
use crate::pipeline::RunReport;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for run duration (in seconds)
const RUN_DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PlotterMetricsInner> = OnceLock::new();

struct PlotterMetricsInner {
    runs_total: IntCounterVec,
    run_duration_seconds: Histogram,
    points_emitted: IntCounter,
    errors_total: IntCounterVec,
    accounts_polled: IntGauge,
    accounts_failed: IntGauge,
    last_success_timestamp: Gauge,
}

impl PlotterMetricsInner {
    fn new() -> Self {
        Self {
            runs_total: register_int_counter_vec!(
                "ri_plotter_runs_total",
                "Polling runs by outcome",
                &["outcome"]
            )
            .expect("Failed to register runs_total"),

            run_duration_seconds: register_histogram!(
                "ri_plotter_run_duration_seconds",
                "Wall-clock duration of a polling run",
                RUN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register run_duration_seconds"),

            points_emitted: register_int_counter!(
                "ri_plotter_points_emitted_total",
                "Metric points accepted by the sink"
            )
            .expect("Failed to register points_emitted"),

            errors_total: register_int_counter_vec!(
                "ri_plotter_errors_total",
                "Errors recorded during polling runs",
                &["kind"]
            )
            .expect("Failed to register errors_total"),

            accounts_polled: register_int_gauge!(
                "ri_plotter_accounts_polled",
                "Accounts processed in the last run"
            )
            .expect("Failed to register accounts_polled"),

            accounts_failed: register_int_gauge!(
                "ri_plotter_accounts_failed",
                "Accounts with at least one failure in the last run"
            )
            .expect("Failed to register accounts_failed"),

            last_success_timestamp: register_gauge!(
                "ri_plotter_last_success_timestamp_seconds",
                "Snapshot timestamp of the last fully successful run"
            )
            .expect("Failed to register last_success_timestamp"),
        }
    }
}

/// Outcome label for a finished run
pub fn run_outcome(result: &Result<RunReport, PlotterError>) -> &'static str {
    match result {
        Ok(report) if report.is_success() => "success",
        Ok(report) if report.aborted => "aborted",
        Ok(_) => "partial",
        Err(_) => "failed",
    }
}

/// Plotter metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct PlotterMetrics {
    _private: (),
}

impl Default for PlotterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PlotterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PlotterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PlotterMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a finished run
    pub fn observe_run(&self, result: &Result<RunReport, PlotterError>, elapsed: Duration) {
        let inner = self.inner();
        inner
            .runs_total
            .with_label_values(&[run_outcome(result)])
            .inc();
        inner.run_duration_seconds.observe(elapsed.as_secs_f64());

        match result {
            Ok(report) => {
                inner.points_emitted.inc_by(report.points_emitted() as u64);
                inner.accounts_polled.set(report.accounts.len() as i64);
                inner.accounts_failed.set(report.failed_accounts() as i64);
                for (_, e) in report.failures() {
                    inner.errors_total.with_label_values(&[e.kind()]).inc();
                }
                if report.is_success() {
                    inner.last_success_timestamp.set(report.snapshot);
                }
            }
            Err(e) => {
                inner.errors_total.with_label_values(&[e.kind()]).inc();
            }
        }
    }

    pub fn points_emitted(&self) -> u64 {
        self.inner().points_emitted.get()
    }

    pub fn runs(&self, outcome: &str) -> u64 {
        self.inner().runs_total.with_label_values(&[outcome]).get()
    }
}

/// Structured logger for plotter lifecycle events
#[derive(Clone)]
pub struct RunLogger {
    instance: String,
}

impl RunLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, accounts_file: &str) {
        info!(
            event = "plotter_started",
            instance = %self.instance,
            version = %version,
            accounts_file = %accounts_file,
            "RI plotter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "plotter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "RI plotter shutting down"
        );
    }

    pub fn log_run_started(&self, ctx: &RunContext) {
        info!(
            event = "run_started",
            instance = %self.instance,
            window_start = %ctx.window.start_str(),
            window_end = %ctx.window.end_str(),
            snapshot = ctx.snapshot,
            "Polling run started"
        );
    }

    pub fn log_run_finished(&self, result: &Result<RunReport, PlotterError>, elapsed: Duration) {
        match result {
            Ok(report) if report.is_success() => {
                info!(
                    event = "run_finished",
                    instance = %self.instance,
                    outcome = run_outcome(result),
                    accounts = report.accounts.len(),
                    points_emitted = report.points_emitted(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Polling run finished"
                );
            }
            Ok(report) => {
                warn!(
                    event = "run_finished",
                    instance = %self.instance,
                    outcome = run_outcome(result),
                    accounts = report.accounts.len(),
                    accounts_failed = report.failed_accounts(),
                    points_emitted = report.points_emitted(),
                    credential_errors = report.count_kind("credential"),
                    billing_errors = report.count_kind("billing_api"),
                    parse_errors = report.count_kind("data_parse"),
                    emit_errors = report.count_kind("emit"),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Polling run finished with failures"
                );
            }
            Err(e) => {
                error!(
                    event = "run_failed",
                    instance = %self.instance,
                    kind = e.kind(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Polling run failed"
                );
            }
        }
    }
}
