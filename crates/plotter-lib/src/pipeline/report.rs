//! Per-account, per-service outcome of one polling run

use crate::error::PlotterError;
use crate::models::{AccountDescriptor, RunContext, TimeWindow};

/// Outcome of polling one service in one account
#[derive(Debug)]
pub struct ServiceReport {
    pub service: String,
    pub utilization_emitted: bool,
    pub coverage_emitted: usize,
    pub errors: Vec<PlotterError>,
}

impl ServiceReport {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            utilization_emitted: false,
            coverage_emitted: 0,
            errors: Vec::new(),
        }
    }

    pub fn points_emitted(&self) -> usize {
        self.coverage_emitted + usize::from(self.utilization_emitted)
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of polling one account
#[derive(Debug)]
pub struct AccountReport {
    pub account_id: String,
    pub label: String,
    /// Set when role assumption failed; no services were polled
    pub credential_error: Option<PlotterError>,
    pub services: Vec<ServiceReport>,
}

impl AccountReport {
    pub fn new(account: &AccountDescriptor) -> Self {
        Self {
            account_id: account.id.clone(),
            label: account.label.clone(),
            credential_error: None,
            services: Vec::new(),
        }
    }

    pub fn points_emitted(&self) -> usize {
        self.services.iter().map(ServiceReport::points_emitted).sum()
    }

    pub fn is_success(&self) -> bool {
        self.credential_error.is_none() && self.services.iter().all(ServiceReport::is_success)
    }

    pub fn errors(&self) -> impl Iterator<Item = &PlotterError> {
        self.credential_error
            .iter()
            .chain(self.services.iter().flat_map(|s| s.errors.iter()))
    }
}

/// Outcome of one polling run
#[derive(Debug)]
pub struct RunReport {
    pub snapshot: f64,
    pub window: TimeWindow,
    pub accounts: Vec<AccountReport>,
    /// True when the run stopped early under the fail-fast policy
    pub aborted: bool,
}

impl RunReport {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            snapshot: ctx.snapshot,
            window: ctx.window,
            accounts: Vec::new(),
            aborted: false,
        }
    }

    pub fn points_emitted(&self) -> usize {
        self.accounts.iter().map(AccountReport::points_emitted).sum()
    }

    pub fn is_success(&self) -> bool {
        self.accounts.iter().all(AccountReport::is_success)
    }

    pub fn failed_accounts(&self) -> usize {
        self.accounts.iter().filter(|a| !a.is_success()).count()
    }

    /// Every recorded error with the account it occurred in
    pub fn failures(&self) -> impl Iterator<Item = (&AccountReport, &PlotterError)> {
        self.accounts
            .iter()
            .flat_map(|a| a.errors().map(move |e| (a, e)))
    }

    /// Number of recorded errors of the given [`PlotterError::kind`]
    pub fn count_kind(&self, kind: &str) -> usize {
        self.failures().filter(|(_, e)| e.kind() == kind).count()
    }

    /// Collapse into a single status for the scheduler: the report itself on
    /// success, otherwise the first failure wrapped with its account.
    pub fn into_result(mut self) -> Result<Self, PlotterError> {
        for account in &mut self.accounts {
            let error = account.credential_error.take().or_else(|| {
                account
                    .services
                    .iter_mut()
                    .find(|s| !s.errors.is_empty())
                    .map(|s| s.errors.remove(0))
            });

            if let Some(error) = error {
                return Err(error.in_account(&account.account_id, &account.label));
            }
        }

        Ok(self)
    }
}
