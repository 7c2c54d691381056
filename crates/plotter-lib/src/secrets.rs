//! Metrics-sink credentials from the SSM parameter store

use crate::emitter::DatadogKeys;
use crate::error::PlotterError;
use async_trait::async_trait;
use aws_sdk_ssm::error::DisplayErrorContext;
use std::collections::HashMap;

/// Looks up named secret parameters
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Returns the values found, keyed by name. Unknown names are omitted.
    async fn get_parameters(&self, names: &[String]) -> Result<HashMap<String, String>, PlotterError>;
}

/// [`SecretSource`] backed by SSM `GetParameters` with decryption
pub struct SsmSecretSource {
    client: aws_sdk_ssm::Client,
}

impl SsmSecretSource {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for SsmSecretSource {
    async fn get_parameters(&self, names: &[String]) -> Result<HashMap<String, String>, PlotterError> {
        let output = self
            .client
            .get_parameters()
            .set_names(Some(names.to_vec()))
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| PlotterError::Secret {
                name: names.join(","),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(output
            .parameters()
            .iter()
            .filter_map(|p| Some((p.name()?.to_string(), p.value()?.to_string())))
            .collect())
    }
}

/// Resolve the Datadog key pair from parameters named `api_key_name` and
/// `app_key_name`.
pub async fn resolve_datadog_keys(
    source: &dyn SecretSource,
    api_key_name: &str,
    app_key_name: &str,
) -> Result<DatadogKeys, PlotterError> {
    let names = vec![api_key_name.to_string(), app_key_name.to_string()];
    let mut values = source.get_parameters(&names).await?;

    let mut take = |name: &str| {
        values.remove(name).ok_or_else(|| PlotterError::Secret {
            name: name.to_string(),
            message: "parameter not found".to_string(),
        })
    };

    Ok(DatadogKeys {
        api_key: take(api_key_name)?,
        app_key: take(app_key_name)?,
    })
}
