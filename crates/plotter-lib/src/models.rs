//! Core data models for the RI plotter

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum distance between window start and end, in calendar days.
/// Cost Explorer only guarantees data for periods ending two days before now.
pub const MIN_WINDOW_DAYS: i64 = 2;

/// Metric type sent to the sink for every point
pub const METRIC_TYPE_GAUGE: &str = "gauge";

/// Tag key prefixes; downstream dashboards query by these
pub mod tag_keys {
    pub const ACCOUNT: &str = "account:";
    pub const SERVICE: &str = "service:";
    pub const INSTANCE_TYPE: &str = "instance_type:";
    pub const REGION: &str = "region:";
}

/// Services tracked on every run, in emission order
pub const TRACKED_SERVICES: [&str; 5] = [
    "Amazon Elastic Compute Cloud - Compute",
    "Amazon Relational Database Service",
    "Amazon ElastiCache",
    "Amazon Redshift",
    "Amazon Elasticsearch Service",
];

/// An account from the registry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDescriptor {
    #[serde(rename = "ID", deserialize_with = "deserialize_account_id")]
    pub id: String,
    #[serde(rename = "Profile")]
    pub label: String,
    #[serde(rename = "Default", default)]
    pub is_home: bool,
}

impl AccountDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, is_home: bool) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_home,
        }
    }
}

/// Account IDs are often written unquoted in YAML; accept both forms.
fn deserialize_account_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Temporary credentials returned by a role assumption
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiry: DateTime<Utc>,
}

impl fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Credential context a billing client is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialScope {
    /// The credentials the process already runs under (home account)
    Ambient,
    /// Credentials obtained by assuming a role in another account
    Assumed(ScopedCredentials),
}

impl CredentialScope {
    pub fn is_ambient(&self) -> bool {
        matches!(self, CredentialScope::Ambient)
    }
}

/// Date window passed to the billing queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The standard polling window: `[now - 2 days, now]`
    pub fn ending_at(now: DateTime<Utc>) -> Self {
        let end = now.date_naive();
        let start = end
            .checked_sub_days(Days::new(MIN_WINDOW_DAYS as u64))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    /// Whether `start` is at least [`MIN_WINDOW_DAYS`] before `end`
    pub fn is_valid(&self) -> bool {
        (self.end - self.start).num_days() >= MIN_WINDOW_DAYS
    }

    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_str(), self.end_str())
    }
}

/// Per-run context shared by every component call.
///
/// Built once before any account is processed; every point emitted in the
/// run carries `snapshot` as its timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunContext {
    pub window: TimeWindow,
    pub snapshot: f64,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window: TimeWindow::ending_at(now),
            snapshot: now.timestamp() as f64,
        }
    }

    pub fn with_window(window: TimeWindow, snapshot: f64) -> Self {
        Self { window, snapshot }
    }
}

/// Utilization for one service. `percentage == None` means the account does
/// not use the service in the window.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationResult {
    pub service: String,
    pub percentage: Option<f64>,
}

/// Coverage for one (region, instance type) group
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRecord {
    pub service: String,
    pub instance_type: String,
    pub region: String,
    pub coverage_percentage: f64,
}

/// Kinds of metric the plotter publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Utilization,
    Coverage,
}

impl MetricKind {
    fn suffix(&self) -> &'static str {
        match self {
            MetricKind::Utilization => "ri.utilization",
            MetricKind::Coverage => "ri.coverage",
        }
    }
}

/// Metric name table keyed by [`MetricKind`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNames {
    prefix: String,
}

impl Default for MetricNames {
    fn default() -> Self {
        Self::new("resource")
    }
}

impl MetricNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn name(&self, kind: MetricKind) -> String {
        format!("{}.{}", self.prefix, kind.suffix())
    }
}

/// A single normalized metric point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub timestamp_unix: f64,
    pub value: f64,
    pub tags: Vec<String>,
    pub host: String,
}
