//! AWS Cost Explorer implementation of [`CostExplorerApi`]

use super::{
    BillingClientFactory, BillingQueryClient, CostExplorerApi, CoverageBucket, CoverageGroup,
    CoverageResponse, ReservationQuery, UtilizationBucket, UtilizationResponse,
    COVERAGE_GROUP_BY,
};
use crate::models::CredentialScope;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::Credentials;
use aws_sdk_costexplorer::config::Region;
use aws_sdk_costexplorer::error::DisplayErrorContext;
use aws_sdk_costexplorer::types::{
    DateInterval, Dimension, DimensionValues, Expression, Granularity, GroupDefinition,
    GroupDefinitionType,
};
use aws_sdk_costexplorer::Client;
use std::sync::Arc;
use std::time::SystemTime;

/// Cost Explorer is only served from us-east-1
pub const COST_EXPLORER_REGION: &str = "us-east-1";

const ASSUMED_PROVIDER_NAME: &str = "ri-plotter-assume-role";

/// Cost Explorer client bound to one credential scope
pub struct SdkCostExplorer {
    client: Client,
}

impl SdkCostExplorer {
    pub fn new(sdk_config: &SdkConfig, region: &str, scope: &CredentialScope) -> Self {
        let mut builder = aws_sdk_costexplorer::config::Builder::from(sdk_config)
            .region(Region::new(region.to_string()));

        if let CredentialScope::Assumed(creds) = scope {
            builder = builder.credentials_provider(Credentials::new(
                creds.access_key.clone(),
                creds.secret_key.clone(),
                Some(creds.session_token.clone()),
                Some(SystemTime::from(creds.expiry)),
                ASSUMED_PROVIDER_NAME,
            ));
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    fn service_filter(service: &str) -> Expression {
        Expression::builder()
            .dimensions(
                DimensionValues::builder()
                    .key(Dimension::Service)
                    .values(service)
                    .build(),
            )
            .build()
    }

    fn time_period(query: &ReservationQuery) -> Result<DateInterval> {
        DateInterval::builder()
            .start(query.window.start_str())
            .end(query.window.end_str())
            .build()
            .context("Invalid date interval")
    }
}

#[async_trait]
impl CostExplorerApi for SdkCostExplorer {
    async fn reservation_utilization(
        &self,
        query: &ReservationQuery,
    ) -> Result<UtilizationResponse> {
        let output = self
            .client
            .get_reservation_utilization()
            .time_period(Self::time_period(query)?)
            .granularity(Granularity::Daily)
            .filter(Self::service_filter(&query.service))
            .send()
            .await
            .map_err(|e| anyhow!(DisplayErrorContext(&e).to_string()))?;

        let buckets = output
            .utilizations_by_time()
            .iter()
            .map(|u| UtilizationBucket {
                start: u.time_period().map(|p| p.start().to_string()),
                end: u.time_period().map(|p| p.end().to_string()),
                utilization_percentage: u
                    .total()
                    .and_then(|t| t.utilization_percentage())
                    .map(str::to_string),
            })
            .collect();

        Ok(UtilizationResponse {
            total_percentage: output
                .total()
                .and_then(|t| t.utilization_percentage())
                .map(str::to_string),
            buckets,
        })
    }

    async fn reservation_coverage(&self, query: &ReservationQuery) -> Result<CoverageResponse> {
        let mut request = self
            .client
            .get_reservation_coverage()
            .time_period(Self::time_period(query)?)
            .filter(Self::service_filter(&query.service))
            .set_next_page_token(query.next_page_token.clone());

        for key in COVERAGE_GROUP_BY {
            request = request.group_by(
                GroupDefinition::builder()
                    .r#type(GroupDefinitionType::Dimension)
                    .key(key)
                    .build(),
            );
        }

        let output = request
            .send()
            .await
            .map_err(|e| anyhow!(DisplayErrorContext(&e).to_string()))?;

        let buckets = output
            .coverages_by_time()
            .iter()
            .map(|c| CoverageBucket {
                start: c.time_period().map(|p| p.start().to_string()),
                end: c.time_period().map(|p| p.end().to_string()),
                groups: c
                    .groups()
                    .iter()
                    .map(|g| CoverageGroup {
                        attributes: g.attributes().cloned().unwrap_or_default(),
                        coverage_hours_percentage: g
                            .coverage()
                            .and_then(|cov| cov.coverage_hours())
                            .and_then(|h| h.coverage_hours_percentage())
                            .map(str::to_string),
                    })
                    .collect(),
            })
            .collect();

        Ok(CoverageResponse {
            buckets,
            next_page_token: output.next_page_token().map(str::to_string),
        })
    }
}

/// Builds [`SdkCostExplorer`]-backed billing clients from a shared SDK config
#[derive(Clone)]
pub struct SdkBillingClientFactory {
    sdk_config: SdkConfig,
    region: String,
}

impl SdkBillingClientFactory {
    pub fn new(sdk_config: SdkConfig, region: impl Into<String>) -> Self {
        Self {
            sdk_config,
            region: region.into(),
        }
    }
}

impl BillingClientFactory for SdkBillingClientFactory {
    fn client_for(&self, scope: &CredentialScope) -> BillingQueryClient {
        let api = SdkCostExplorer::new(&self.sdk_config, &self.region, scope);
        BillingQueryClient::new(Arc::new(api))
    }
}
