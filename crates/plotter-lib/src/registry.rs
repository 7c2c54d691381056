//! Account registry
//!
//! Loads the ordered list of accounts to poll from a YAML file:
//!
//! ```yaml
//! - ID: "123456789012"
//!   Profile: home
//!   Default: true
//! - ID: "223456789012"
//!   Profile: other
//! ```

use crate::error::PlotterError;
use crate::models::AccountDescriptor;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Load and validate accounts from `path`, preserving file order.
pub async fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<AccountDescriptor>, PlotterError> {
    let path = path.as_ref();
    let source = path.display().to_string();

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PlotterError::ConfigLoad {
            path: source.clone(),
            reason: e.to_string(),
        })?;

    let accounts = parse_accounts(&content, &source)?;
    debug!(path = %source, accounts = accounts.len(), "Loaded account registry");

    Ok(accounts)
}

/// Parse and validate an account list. `source` is only used in errors.
pub fn parse_accounts(content: &str, source: &str) -> Result<Vec<AccountDescriptor>, PlotterError> {
    let config_error = |reason: String| PlotterError::ConfigLoad {
        path: source.to_string(),
        reason,
    };

    // An empty document deserializes to null rather than an empty list
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let accounts: Vec<AccountDescriptor> =
        serde_yaml::from_str(content).map_err(|e| config_error(e.to_string()))?;

    validate(&accounts).map_err(config_error)?;

    Ok(accounts)
}

fn validate(accounts: &[AccountDescriptor]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for account in accounts {
        if account.id.trim().is_empty() {
            return Err(format!("account {:?} has an empty ID", account.label));
        }
        if !seen.insert(account.id.as_str()) {
            return Err(format!("duplicate account ID {}", account.id));
        }
    }

    let homes: Vec<&str> = accounts
        .iter()
        .filter(|a| a.is_home)
        .map(|a| a.id.as_str())
        .collect();
    if homes.len() > 1 {
        return Err(format!(
            "more than one account marked Default: {}",
            homes.join(", ")
        ));
    }

    Ok(())
}
