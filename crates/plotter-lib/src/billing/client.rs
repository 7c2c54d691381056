//! Billing query client bound to one credential scope

use super::{CostExplorerApi, ReservationQuery, ATTR_INSTANCE_TYPE, ATTR_REGION};
use crate::error::{BillingOperation, PlotterError};
use crate::models::{CoverageRecord, TimeWindow, UtilizationResult, MIN_WINDOW_DAYS};
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on coverage pages followed for a single query
const MAX_COVERAGE_PAGES: usize = 50;

/// Coverage records for one service, plus groups that could not be normalized
#[derive(Debug, Default)]
pub struct CoverageSet {
    pub records: Vec<CoverageRecord>,
    pub rejected: Vec<PlotterError>,
}

impl CoverageSet {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse a percentage string from a billing response
pub fn parse_percentage(
    service: &str,
    field: &'static str,
    raw: &str,
) -> Result<f64, PlotterError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(PlotterError::DataParse {
            service: service.to_string(),
            field,
            value: raw.to_string(),
        }),
    }
}

/// Queries utilization and coverage under whichever credentials the
/// underlying [`CostExplorerApi`] was built with
#[derive(Clone)]
pub struct BillingQueryClient {
    api: Arc<dyn CostExplorerApi>,
}

impl BillingQueryClient {
    pub fn new(api: Arc<dyn CostExplorerApi>) -> Self {
        Self { api }
    }

    /// Fetch the RI utilization percentage of `service` over `window`.
    ///
    /// Returns a result with `percentage: None` when the account has no
    /// reservations for the service in the window.
    pub async fn fetch_utilization(
        &self,
        service: &str,
        window: &TimeWindow,
    ) -> Result<UtilizationResult, PlotterError> {
        check_window(window)?;

        let query = ReservationQuery::new(service, *window);
        let response = self
            .api
            .reservation_utilization(&query)
            .await
            .map_err(|e| billing_error(service, BillingOperation::Utilization, e))?;

        if response.buckets.is_empty() {
            debug!(service = %service, "No utilization data, service unused");
            return Ok(UtilizationResult {
                service: service.to_string(),
                percentage: None,
            });
        }

        let raw = response
            .total_percentage
            .as_deref()
            .or_else(|| {
                response
                    .buckets
                    .iter()
                    .find_map(|b| b.utilization_percentage.as_deref())
            })
            .ok_or_else(|| PlotterError::DataParse {
                service: service.to_string(),
                field: "UtilizationPercentage",
                value: String::new(),
            })?;

        let percentage = parse_percentage(service, "UtilizationPercentage", raw)?;

        Ok(UtilizationResult {
            service: service.to_string(),
            percentage: Some(percentage),
        })
    }

    /// Fetch per-(region, instance type) coverage of `service` over `window`,
    /// flattening every time bucket and following pagination.
    pub async fn fetch_coverage(
        &self,
        service: &str,
        window: &TimeWindow,
    ) -> Result<CoverageSet, PlotterError> {
        check_window(window)?;

        let mut query = ReservationQuery::new(service, *window);
        let mut set = CoverageSet::default();
        let mut pages = 0;

        loop {
            let response = self
                .api
                .reservation_coverage(&query)
                .await
                .map_err(|e| billing_error(service, BillingOperation::Coverage, e))?;
            pages += 1;

            for group in response.buckets.iter().flat_map(|b| b.groups.iter()) {
                match normalize_group(service, group) {
                    Ok(record) => set.records.push(record),
                    Err(e) => set.rejected.push(e),
                }
            }

            match response.next_page_token {
                Some(token) if pages < MAX_COVERAGE_PAGES => query.next_page_token = Some(token),
                Some(_) => {
                    warn!(service = %service, pages, "Coverage pagination limit reached");
                    break;
                }
                None => break,
            }
        }

        debug!(
            service = %service,
            records = set.records.len(),
            rejected = set.rejected.len(),
            "Fetched coverage"
        );

        Ok(set)
    }
}

fn check_window(window: &TimeWindow) -> Result<(), PlotterError> {
    if window.is_valid() {
        Ok(())
    } else {
        Err(PlotterError::InvalidWindow {
            start: window.start,
            end: window.end,
            min_days: MIN_WINDOW_DAYS,
        })
    }
}

fn billing_error(service: &str, operation: BillingOperation, e: anyhow::Error) -> PlotterError {
    PlotterError::BillingApi {
        service: service.to_string(),
        operation,
        message: format!("{:#}", e),
    }
}

fn normalize_group(
    service: &str,
    group: &super::CoverageGroup,
) -> Result<CoverageRecord, PlotterError> {
    let attribute = |key: &'static str| {
        group
            .attributes
            .get(key)
            .cloned()
            .ok_or_else(|| PlotterError::DataParse {
                service: service.to_string(),
                field: key,
                value: String::new(),
            })
    };

    let region = attribute(ATTR_REGION)?;
    let instance_type = attribute(ATTR_INSTANCE_TYPE)?;

    let raw = group.coverage_hours_percentage.as_deref().unwrap_or_default();
    let coverage_percentage = parse_percentage(service, "CoverageHoursPercentage", raw)?;

    Ok(CoverageRecord {
        service: service.to_string(),
        instance_type,
        region,
        coverage_percentage,
    })
}
