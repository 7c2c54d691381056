//! Reserved-instance billing queries
//!
//! This module provides:
//! - [`CostExplorerApi`], the raw query boundary (one impl per transport)
//! - [`BillingQueryClient`], which validates windows, pages through results
//!   and normalizes responses into [`UtilizationResult`] / [`CoverageRecord`]
//! - [`BillingClientFactory`], which binds a client to a credential scope
//!
//! [`UtilizationResult`]: crate::models::UtilizationResult
//! [`CoverageRecord`]: crate::models::CoverageRecord

mod client;
mod cost_explorer;

pub use client::{parse_percentage, BillingQueryClient, CoverageSet};
pub use cost_explorer::{SdkBillingClientFactory, SdkCostExplorer, COST_EXPLORER_REGION};

use crate::models::{CredentialScope, TimeWindow};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Group attribute holding the coverage region
pub const ATTR_REGION: &str = "region";
/// Group attribute holding the coverage instance type
pub const ATTR_INSTANCE_TYPE: &str = "instanceType";

/// Dimensions coverage is grouped by
pub const COVERAGE_GROUP_BY: [&str; 2] = ["REGION", "INSTANCE_TYPE"];

/// A reservation query filtered to one service
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationQuery {
    pub service: String,
    pub window: TimeWindow,
    /// Only coverage queries are paged
    pub next_page_token: Option<String>,
}

impl ReservationQuery {
    pub fn new(service: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            service: service.into(),
            window,
            next_page_token: None,
        }
    }
}

/// Utilization response as returned by the provider
#[derive(Debug, Clone, Default)]
pub struct UtilizationResponse {
    /// Aggregate over the whole window
    pub total_percentage: Option<String>,
    pub buckets: Vec<UtilizationBucket>,
}

#[derive(Debug, Clone, Default)]
pub struct UtilizationBucket {
    pub start: Option<String>,
    pub end: Option<String>,
    pub utilization_percentage: Option<String>,
}

/// One page of a coverage response
#[derive(Debug, Clone, Default)]
pub struct CoverageResponse {
    pub buckets: Vec<CoverageBucket>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CoverageBucket {
    pub start: Option<String>,
    pub end: Option<String>,
    pub groups: Vec<CoverageGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct CoverageGroup {
    pub attributes: HashMap<String, String>,
    pub coverage_hours_percentage: Option<String>,
}

/// Raw reservation queries against the billing provider
#[async_trait]
pub trait CostExplorerApi: Send + Sync {
    /// Daily-granularity utilization filtered to `query.service`
    async fn reservation_utilization(&self, query: &ReservationQuery)
        -> Result<UtilizationResponse>;

    /// Coverage filtered to `query.service`, grouped by [`COVERAGE_GROUP_BY`]
    async fn reservation_coverage(&self, query: &ReservationQuery) -> Result<CoverageResponse>;
}

/// Builds billing clients bound to a credential scope
pub trait BillingClientFactory: Send + Sync {
    fn client_for(&self, scope: &CredentialScope) -> BillingQueryClient;
}
