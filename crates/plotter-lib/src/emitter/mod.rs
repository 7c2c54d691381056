//! Metric emission
//!
//! [`MetricEmitter`] turns utilization and coverage results into
//! [`MetricPoint`]s with a fixed tag layout and hands them to a
//! [`MetricsSink`] one single-point series at a time.

mod datadog;

pub use datadog::{DatadogKeys, DatadogSink, DEFAULT_DATADOG_URL};

use crate::error::PlotterError;
use crate::models::{
    tag_keys, AccountDescriptor, CoverageRecord, MetricKind, MetricNames, MetricPoint,
    RunContext,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Destination for metric points
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Submit a batch of points; any non-success response is an error
    async fn submit(&self, points: &[MetricPoint]) -> Result<(), PlotterError>;
}

/// Builds and emits RI metric points
#[derive(Clone)]
pub struct MetricEmitter {
    sink: Arc<dyn MetricsSink>,
    names: MetricNames,
}

impl MetricEmitter {
    pub fn new(sink: Arc<dyn MetricsSink>, names: MetricNames) -> Self {
        Self { sink, names }
    }

    pub fn names(&self) -> &MetricNames {
        &self.names
    }

    /// Point for an account's utilization of `service`
    pub fn utilization_point(
        &self,
        ctx: &RunContext,
        service: &str,
        percentage: f64,
        account: &AccountDescriptor,
    ) -> MetricPoint {
        MetricPoint {
            name: self.names.name(MetricKind::Utilization),
            timestamp_unix: ctx.snapshot,
            value: percentage,
            tags: account_tags(account, service),
            host: account.label.clone(),
        }
    }

    /// Point for one coverage record of `service`
    pub fn coverage_point(
        &self,
        ctx: &RunContext,
        service: &str,
        record: &CoverageRecord,
        account: &AccountDescriptor,
    ) -> MetricPoint {
        let mut tags = vec![
            format!("{}{}", tag_keys::INSTANCE_TYPE, record.instance_type),
            format!("{}{}", tag_keys::REGION, record.region),
        ];
        tags.extend(account_tags(account, service));

        MetricPoint {
            name: self.names.name(MetricKind::Coverage),
            timestamp_unix: ctx.snapshot,
            value: record.coverage_percentage,
            tags,
            host: account.label.clone(),
        }
    }

    pub async fn emit_utilization(
        &self,
        ctx: &RunContext,
        service: &str,
        percentage: f64,
        account: &AccountDescriptor,
    ) -> Result<MetricPoint, PlotterError> {
        let point = self.utilization_point(ctx, service, percentage, account);
        self.emit(point).await
    }

    pub async fn emit_coverage(
        &self,
        ctx: &RunContext,
        service: &str,
        record: &CoverageRecord,
        account: &AccountDescriptor,
    ) -> Result<MetricPoint, PlotterError> {
        let point = self.coverage_point(ctx, service, record, account);
        self.emit(point).await
    }

    async fn emit(&self, point: MetricPoint) -> Result<MetricPoint, PlotterError> {
        self.sink.submit(std::slice::from_ref(&point)).await?;
        debug!(
            metric = %point.name,
            host = %point.host,
            value = point.value,
            "Emitted metric point"
        );
        Ok(point)
    }
}

fn account_tags(account: &AccountDescriptor, service: &str) -> Vec<String> {
    vec![
        format!("{}{}", tag_keys::ACCOUNT, account.label),
        account.label.clone(),
        format!("{}{}", tag_keys::SERVICE, service),
    ]
}
