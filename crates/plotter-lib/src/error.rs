//! Error kinds raised while polling and publishing RI metrics

use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// Billing query that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingOperation {
    Utilization,
    Coverage,
}

impl fmt::Display for BillingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingOperation::Utilization => f.write_str("GetReservationUtilization"),
            BillingOperation::Coverage => f.write_str("GetReservationCoverage"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PlotterError {
    /// The account source could not be read, parsed or validated.
    #[error("failed to load accounts from {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Role assumption was rejected for an account.
    #[error("failed to assume role for account {account_id}: {message}")]
    Credential { account_id: String, message: String },

    #[error("invalid billing window {start}..{end}: start must be at least {min_days} days before end")]
    InvalidWindow {
        start: NaiveDate,
        end: NaiveDate,
        min_days: i64,
    },

    /// Transport, authorization or throttling failure from Cost Explorer.
    #[error("{operation} failed for service {service}: {message}")]
    BillingApi {
        service: String,
        operation: BillingOperation,
        message: String,
    },

    /// A numeric field in a billing response was missing or malformed.
    #[error("malformed {field} {value:?} for service {service}")]
    DataParse {
        service: String,
        field: &'static str,
        value: String,
    },

    /// The metrics sink rejected a point.
    #[error("failed to emit {metric} for host {host}: {message}")]
    Emit {
        metric: String,
        host: String,
        message: String,
    },

    #[error("failed to resolve secret {name}: {message}")]
    Secret { name: String, message: String },

    /// Wraps a failure with the account it happened in.
    #[error("account {account_id} ({label})")]
    Account {
        account_id: String,
        label: String,
        #[source]
        source: Box<PlotterError>,
    },
}

impl PlotterError {
    /// Short machine-friendly name of the error kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            PlotterError::ConfigLoad { .. } => "config_load",
            PlotterError::Credential { .. } => "credential",
            PlotterError::InvalidWindow { .. } => "invalid_window",
            PlotterError::BillingApi { .. } => "billing_api",
            PlotterError::DataParse { .. } => "data_parse",
            PlotterError::Emit { .. } => "emit",
            PlotterError::Secret { .. } => "secret",
            PlotterError::Account { source, .. } => source.kind(),
        }
    }

    pub(crate) fn in_account(self, account_id: &str, label: &str) -> Self {
        PlotterError::Account {
            account_id: account_id.to_string(),
            label: label.to_string(),
            source: Box::new(self),
        }
    }
}
