//! Datadog metrics sink (v1 series API)

use super::MetricsSink;
use crate::error::PlotterError;
use crate::models::{MetricPoint, METRIC_TYPE_GAUGE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_DATADOG_URL: &str = "https://api.datadoghq.com";

const SERIES_PATH: &str = "api/v1/series";
const API_KEY_HEADER: &str = "DD-API-KEY";
const APP_KEY_HEADER: &str = "DD-APPLICATION-KEY";

/// Datadog API and application key pair
#[derive(Clone, PartialEq, Eq)]
pub struct DatadogKeys {
    pub api_key: String,
    pub app_key: String,
}

impl fmt::Debug for DatadogKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatadogKeys")
            .field("api_key", &"** redacted **")
            .field("app_key", &"** redacted **")
            .finish()
    }
}

#[derive(Serialize)]
struct SeriesPayload<'a> {
    series: Vec<Series<'a>>,
}

#[derive(Serialize)]
struct Series<'a> {
    metric: &'a str,
    points: Vec<[f64; 2]>,
    #[serde(rename = "type")]
    metric_type: &'static str,
    host: &'a str,
    tags: &'a [String],
}

impl<'a> From<&'a MetricPoint> for Series<'a> {
    fn from(point: &'a MetricPoint) -> Self {
        Self {
            metric: &point.name,
            points: vec![[point.timestamp_unix, point.value]],
            metric_type: METRIC_TYPE_GAUGE,
            host: &point.host,
            tags: &point.tags,
        }
    }
}

/// Posts metric series to Datadog over HTTPS
pub struct DatadogSink {
    client: Client,
    series_url: Url,
    keys: DatadogKeys,
}

impl DatadogSink {
    pub fn new(base_url: &str, keys: DatadogKeys, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid Datadog URL")?;
        // Url::join replaces the last path segment unless it ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let series_url = base_url.join(SERIES_PATH).context("Invalid series path")?;

        Ok(Self {
            client,
            series_url,
            keys,
        })
    }

    pub fn series_url(&self) -> &Url {
        &self.series_url
    }
}

#[async_trait]
impl MetricsSink for DatadogSink {
    async fn submit(&self, points: &[MetricPoint]) -> Result<(), PlotterError> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        let emit_error = |message: String| PlotterError::Emit {
            metric: first.name.clone(),
            host: first.host.clone(),
            message,
        };

        let payload = SeriesPayload {
            series: points.iter().map(Series::from).collect(),
        };

        let response = self
            .client
            .post(self.series_url.clone())
            .header(API_KEY_HEADER, &self.keys.api_key)
            .header(APP_KEY_HEADER, &self.keys.app_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| emit_error(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(emit_error(format!("sink returned {}: {}", status, body)));
        }

        Ok(())
    }
}
