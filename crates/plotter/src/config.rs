//! Plotter configuration

use anyhow::{Context, Result};
use plotter_lib::emitter::{DatadogKeys, DEFAULT_DATADOG_URL};
use plotter_lib::models::{MetricNames, TRACKED_SERVICES};
use plotter_lib::FailurePolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const ENV_PREFIX: &str = "PLOTTER";

/// Plotter configuration, read from `PLOTTER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct PlotterConfig {
    /// Account registry file
    #[serde(default = "default_accounts_file")]
    pub accounts_file: String,

    /// Region for STS and SSM
    #[serde(default = "default_region")]
    pub region: String,

    /// Region the billing API is served from
    #[serde(default = "default_cost_explorer_region")]
    pub cost_explorer_region: String,

    /// Role assumed in every non-home account
    #[serde(default = "default_role_name")]
    pub role_name: String,

    /// SSM parameter holding the Datadog API key
    #[serde(default = "default_dd_api_key_name")]
    pub dd_api_key_name: String,

    /// SSM parameter holding the Datadog application key
    #[serde(default = "default_dd_app_key_name")]
    pub dd_app_key_name: String,

    /// Datadog keys given directly; when both are set SSM is not queried
    #[serde(default)]
    pub dd_api_key: Option<String>,
    #[serde(default)]
    pub dd_app_key: Option<String>,

    #[serde(default = "default_datadog_url")]
    pub datadog_url: String,

    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    /// Comma-separated override of the tracked services
    #[serde(default)]
    pub services: Option<String>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_account_concurrency")]
    pub account_concurrency: usize,

    /// Seconds between polling runs; 0 runs once and exits
    #[serde(default)]
    pub interval_secs: u64,

    /// API server port for health/metrics (polling mode only)
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Timeout for each metrics sink request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Instance name attached to lifecycle logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

fn default_accounts_file() -> String {
    "configs/awsaccount.yml".to_string()
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_cost_explorer_region() -> String {
    plotter_lib::billing::COST_EXPLORER_REGION.to_string()
}

fn default_role_name() -> String {
    plotter_lib::credentials::DEFAULT_ROLE_NAME.to_string()
}

fn default_dd_api_key_name() -> String {
    "datadog_api_key".to_string()
}

fn default_dd_app_key_name() -> String {
    "datadog_app_key".to_string()
}

fn default_datadog_url() -> String {
    DEFAULT_DATADOG_URL.to_string()
}

fn default_metric_prefix() -> String {
    "resource".to_string()
}

fn default_account_concurrency() -> usize {
    1
}

fn default_api_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_instance_name() -> String {
    "ri-plotter".to_string()
}

impl PlotterConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(None)
    }

    /// Load configuration from an explicit variable map instead of the
    /// process environment
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_source(Some(vars))
    }

    fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: PlotterConfig = config
            .try_deserialize()
            .context("Invalid plotter configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.account_concurrency == 0 {
            anyhow::bail!("account_concurrency must be at least 1");
        }
        if self.metric_prefix.trim().is_empty() {
            anyhow::bail!("metric_prefix must not be empty");
        }
        if self.services().is_empty() {
            anyhow::bail!("services must name at least one service");
        }
        Ok(())
    }

    /// `None` means run once
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn metric_names(&self) -> MetricNames {
        MetricNames::new(self.metric_prefix.trim())
    }

    /// Tracked services, in polling order
    pub fn services(&self) -> Vec<String> {
        match &self.services {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => TRACKED_SERVICES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Keys configured directly, if both are present
    pub fn direct_datadog_keys(&self) -> Option<DatadogKeys> {
        match (&self.dd_api_key, &self.dd_app_key) {
            (Some(api_key), Some(app_key)) => Some(DatadogKeys {
                api_key: api_key.clone(),
                app_key: app_key.clone(),
            }),
            _ => None,
        }
    }
}
