//! RI plotter - Reserved-Instance utilization/coverage to Datadog
//!
//! Runs once and exits with the run status, or, when an interval is
//! configured, polls periodically behind a health/metrics server.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use chrono::Utc;
use plotter_lib::{
    billing::SdkBillingClientFactory,
    credentials::StsCredentialBroker,
    emitter::{DatadogKeys, DatadogSink, MetricEmitter},
    health::HealthRegistry,
    observability::{PlotterMetrics, RunLogger},
    pipeline::{OrchestratorBuilder, PollConfig, PollLoop},
    secrets::{resolve_datadog_keys, SsmSecretSource},
};
use ri_plotter::{api, config::PlotterConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PLOTTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = PlotterConfig::load()?;

    let logger = RunLogger::new(&config.instance_name);
    logger.log_startup(PLOTTER_VERSION, &config.accounts_file);

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    let keys = datadog_keys(&config, &sdk_config).await?;
    let sink = DatadogSink::new(&config.datadog_url, keys, config.request_timeout())?;

    let orchestrator = OrchestratorBuilder::new()
        .broker(Arc::new(StsCredentialBroker::new(
            aws_sdk_sts::Client::new(&sdk_config),
            config.role_name.clone(),
        )))
        .billing(Arc::new(SdkBillingClientFactory::new(
            sdk_config.clone(),
            config.cost_explorer_region.clone(),
        )))
        .emitter(MetricEmitter::new(Arc::new(sink), config.metric_names()))
        .accounts_path(&config.accounts_file)
        .services(config.services())
        .failure_policy(config.failure_policy)
        .account_concurrency(config.account_concurrency)
        .build()?;

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;
    let metrics = PlotterMetrics::new();

    let poll_config = PollConfig {
        interval: config
            .poll_interval()
            .unwrap_or(PollConfig::default().interval),
    };
    let poll_loop = PollLoop::new(
        orchestrator,
        poll_config,
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    );

    if config.poll_interval().is_none() {
        let report = poll_loop.poll_once(Utc::now()).await?.into_result()?;
        info!(
            accounts = report.accounts.len(),
            points_emitted = report.points_emitted(),
            "Run completed"
        );
        logger.log_shutdown("run completed");
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));
    let poll_handle = tokio::spawn(poll_loop.run(shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    poll_handle.await?;
    api_handle.await??;

    Ok(())
}

/// Datadog keys from configuration, falling back to the SSM parameter store
async fn datadog_keys(
    config: &PlotterConfig,
    sdk_config: &aws_config::SdkConfig,
) -> Result<DatadogKeys> {
    if let Some(keys) = config.direct_datadog_keys() {
        return Ok(keys);
    }

    let source = SsmSecretSource::new(aws_sdk_ssm::Client::new(sdk_config));
    resolve_datadog_keys(&source, &config.dd_api_key_name, &config.dd_app_key_name)
        .await
        .context("Failed to resolve Datadog keys")
}
