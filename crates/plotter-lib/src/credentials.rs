//! Cross-account role assumption
//!
//! Every non-home account is accessed through temporary credentials obtained
//! by assuming a fixed monitoring role in that account. Credentials are never
//! cached: each account gets a fresh exchange on every run.

use crate::error::PlotterError;
use crate::models::ScopedCredentials;
use async_trait::async_trait;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Role assumed in every monitored account
pub const DEFAULT_ROLE_NAME: &str = "stsMonitor";

/// Validity requested for assumed credentials (15 minutes)
pub const SESSION_DURATION_SECS: i32 = 900;

const SESSION_NAME_PREFIX: &str = "RIof";

/// Exchanges an account ID for temporary, account-scoped credentials
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn assume_role(&self, account_id: &str) -> Result<ScopedCredentials, PlotterError>;
}

/// ARN of the monitoring role in `account_id`
pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

/// Session name recorded in CloudTrail for the assumption
pub fn session_name(account_id: &str) -> String {
    format!("{}{}", SESSION_NAME_PREFIX, account_id)
}

/// [`CredentialBroker`] backed by AWS STS `AssumeRole`
pub struct StsCredentialBroker {
    client: aws_sdk_sts::Client,
    role_name: String,
}

impl StsCredentialBroker {
    pub fn new(client: aws_sdk_sts::Client, role_name: impl Into<String>) -> Self {
        Self {
            client,
            role_name: role_name.into(),
        }
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }
}

#[async_trait]
impl CredentialBroker for StsCredentialBroker {
    async fn assume_role(&self, account_id: &str) -> Result<ScopedCredentials, PlotterError> {
        let arn = role_arn(account_id, &self.role_name);
        debug!(account_id = %account_id, role_arn = %arn, "Assuming role");

        let output = self
            .client
            .assume_role()
            .role_arn(&arn)
            .role_session_name(session_name(account_id))
            .duration_seconds(SESSION_DURATION_SECS)
            .send()
            .await
            .map_err(|e| PlotterError::Credential {
                account_id: account_id.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let creds = output.credentials().ok_or_else(|| PlotterError::Credential {
            account_id: account_id.to_string(),
            message: "AssumeRole response did not include credentials".to_string(),
        })?;

        let expiry = DateTime::<Utc>::from_timestamp(creds.expiration().secs(), 0)
            .unwrap_or_else(Utc::now);

        Ok(ScopedCredentials {
            access_key: creds.access_key_id().to_string(),
            secret_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expiry,
        })
    }
}
