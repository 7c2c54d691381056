//! Multi-account polling orchestrator
//!
//! For each account: obtain a credential scope (ambient for the home account,
//! an assumed role otherwise), bind a billing client to it, then fetch and
//! emit utilization and coverage for every tracked service.

use super::report::{AccountReport, RunReport, ServiceReport};
use crate::billing::{BillingClientFactory, BillingQueryClient};
use crate::credentials::CredentialBroker;
use crate::emitter::MetricEmitter;
use crate::error::PlotterError;
use crate::models::{
    AccountDescriptor, CredentialScope, RunContext, MIN_WINDOW_DAYS, TRACKED_SERVICES,
};
use crate::registry::load_accounts;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole run at the first error
    FailFast,
    /// Record the error, skip the failed account/service/point and continue
    #[default]
    Isolate,
}

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Account registry file
    pub accounts_path: PathBuf,
    /// Services polled in every account, in order
    pub services: Vec<String>,
    pub failure_policy: FailurePolicy,
    /// Accounts processed concurrently (ignored under fail-fast)
    pub account_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            accounts_path: PathBuf::from("configs/awsaccount.yml"),
            services: TRACKED_SERVICES.iter().map(|s| s.to_string()).collect(),
            failure_policy: FailurePolicy::default(),
            account_concurrency: 1,
        }
    }
}

/// Composes the registry, credential broker, billing client and emitter
#[derive(Clone)]
pub struct Orchestrator {
    broker: Arc<dyn CredentialBroker>,
    billing: Arc<dyn BillingClientFactory>,
    emitter: MetricEmitter,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        broker: Arc<dyn CredentialBroker>,
        billing: Arc<dyn BillingClientFactory>,
        emitter: MetricEmitter,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            broker,
            billing,
            emitter,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn fail_fast(&self) -> bool {
        self.config.failure_policy == FailurePolicy::FailFast
    }

    /// Load the account registry and poll every account.
    ///
    /// Only run-level failures (unreadable registry, invalid window) are
    /// returned as `Err`; everything else is recorded in the report.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport, PlotterError> {
        let accounts = load_accounts(&self.config.accounts_path).await?;
        self.run_accounts(ctx, &accounts).await
    }

    /// Poll the given accounts in registry order
    pub async fn run_accounts(
        &self,
        ctx: &RunContext,
        accounts: &[AccountDescriptor],
    ) -> Result<RunReport, PlotterError> {
        if !ctx.window.is_valid() {
            return Err(PlotterError::InvalidWindow {
                start: ctx.window.start,
                end: ctx.window.end,
                min_days: MIN_WINDOW_DAYS,
            });
        }

        info!(
            accounts = accounts.len(),
            services = self.config.services.len(),
            window = %ctx.window,
            policy = ?self.config.failure_policy,
            "Starting RI polling run"
        );

        let mut report = RunReport::new(ctx);

        if self.fail_fast() {
            for account in accounts {
                let account_report = self.process_account(ctx, account).await;
                let failed = !account_report.is_success();
                report.accounts.push(account_report);
                if failed {
                    warn!(account_id = %account.id, "Aborting run after first failure");
                    report.aborted = true;
                    break;
                }
            }
        } else {
            let concurrency = self.config.account_concurrency.max(1);
            // Collected before buffering; a lazily mapped stream is not Send
            let pending: Vec<_> = accounts
                .iter()
                .map(|account| self.process_account(ctx, account))
                .collect();
            report.accounts = stream::iter(pending)
                .buffered(concurrency)
                .collect::<Vec<_>>()
                .await;
        }

        Ok(report)
    }

    async fn process_account(&self, ctx: &RunContext, account: &AccountDescriptor) -> AccountReport {
        let mut report = AccountReport::new(account);

        let scope = if account.is_home {
            CredentialScope::Ambient
        } else {
            match self.broker.assume_role(&account.id).await {
                Ok(creds) => CredentialScope::Assumed(creds),
                Err(e) => {
                    warn!(
                        account_id = %account.id,
                        label = %account.label,
                        error = %e,
                        "Skipping account, role assumption failed"
                    );
                    report.credential_error = Some(e);
                    return report;
                }
            }
        };

        debug!(
            account_id = %account.id,
            ambient = scope.is_ambient(),
            "Processing account"
        );

        let client = self.billing.client_for(&scope);

        for service in &self.config.services {
            let service_report = self.process_service(ctx, &client, account, service).await;
            let failed = !service_report.is_success();
            report.services.push(service_report);
            if failed && self.fail_fast() {
                break;
            }
        }

        report
    }

    async fn process_service(
        &self,
        ctx: &RunContext,
        client: &BillingQueryClient,
        account: &AccountDescriptor,
        service: &str,
    ) -> ServiceReport {
        let mut report = ServiceReport::new(service);

        match client.fetch_utilization(service, &ctx.window).await {
            Ok(util) => {
                if let Some(percentage) = util.percentage {
                    match self
                        .emitter
                        .emit_utilization(ctx, service, percentage, account)
                        .await
                    {
                        Ok(_) => report.utilization_emitted = true,
                        Err(e) => self.record(&mut report, account, e),
                    }
                }
            }
            Err(e) => self.record(&mut report, account, e),
        }

        if self.fail_fast() && !report.is_success() {
            return report;
        }

        let coverage = match client.fetch_coverage(service, &ctx.window).await {
            Ok(coverage) => coverage,
            Err(e) => {
                self.record(&mut report, account, e);
                return report;
            }
        };

        for e in coverage.rejected {
            self.record(&mut report, account, e);
            if self.fail_fast() {
                return report;
            }
        }

        for record in &coverage.records {
            match self.emitter.emit_coverage(ctx, service, record, account).await {
                Ok(_) => report.coverage_emitted += 1,
                Err(e) => {
                    self.record(&mut report, account, e);
                    if self.fail_fast() {
                        return report;
                    }
                }
            }
        }

        report
    }

    fn record(&self, report: &mut ServiceReport, account: &AccountDescriptor, error: PlotterError) {
        warn!(
            account_id = %account.id,
            label = %account.label,
            service = %report.service,
            kind = error.kind(),
            error = %error,
            "RI polling step failed"
        );
        report.errors.push(error);
    }
}

/// Builder for the orchestrator
pub struct OrchestratorBuilder {
    broker: Option<Arc<dyn CredentialBroker>>,
    billing: Option<Arc<dyn BillingClientFactory>>,
    emitter: Option<MetricEmitter>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            broker: None,
            billing: None,
            emitter: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn broker(mut self, broker: Arc<dyn CredentialBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn billing(mut self, billing: Arc<dyn BillingClientFactory>) -> Self {
        self.billing = Some(billing);
        self
    }

    pub fn emitter(mut self, emitter: MetricEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn accounts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.accounts_path = path.into();
        self
    }

    pub fn services(mut self, services: Vec<String>) -> Self {
        self.config.services = services;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn account_concurrency(mut self, concurrency: usize) -> Self {
        self.config.account_concurrency = concurrency;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let broker = self
            .broker
            .ok_or_else(|| anyhow::anyhow!("Credential broker is required"))?;
        let billing = self
            .billing
            .ok_or_else(|| anyhow::anyhow!("Billing client factory is required"))?;
        let emitter = self
            .emitter
            .ok_or_else(|| anyhow::anyhow!("Metric emitter is required"))?;

        if self.config.services.is_empty() {
            anyhow::bail!("At least one service must be tracked");
        }

        Ok(Orchestrator::new(broker, billing, emitter, self.config))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
