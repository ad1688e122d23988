//! # Parameter Store Client
//!
//! Reads one SSM parameter by name, always with decryption so `SecureString`
//! parameters come back as plaintext. A missing parameter is `Ok(None)`.

use async_trait::async_trait;
use aws_sdk_ssm::error::SdkError;
use aws_sdk_ssm::operation::get_parameter::GetParameterError;
use aws_sdk_ssm::Client as SsmClient;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("parameter store request failed: {0}")]
    Request(#[source] Box<SdkError<GetParameterError>>),
    #[error("parameter store request timed out after {0:?}")]
    Timeout(Duration),
    #[error("parameter has no value")]
    MissingValue,
}

/// Key/value store the launcher resolves references against
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Decrypted value of `name`, or `None` if no such parameter exists
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, ParameterError>;
}

/// [`ParameterStore`] backed by AWS Systems Manager
pub struct SsmParameterStore {
    client: SsmClient,
    region: String,
}

impl std::fmt::Debug for SsmParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsmParameterStore")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl SsmParameterStore {
    /// Builds a client for `region` using the default credential chain
    ///
    /// Works with IRSA, instance profiles and static credentials alike.
    pub async fn new(region: &str) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: SsmClient::new(&sdk_config),
            region: region.to_string(),
        }
    }

    pub fn from_client(client: SsmClient, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, ParameterError> {
        let response = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await;

        match response {
            Ok(output) => {
                let value = output
                    .parameter()
                    .and_then(|p| p.value())
                    .ok_or(ParameterError::MissingValue)?;
                Ok(Some(value.to_string()))
            }
            Err(e) if e.as_service_error().is_some_and(GetParameterError::is_parameter_not_found) => {
                debug!(name, "Parameter not found");
                Ok(None)
            }
            Err(e) => Err(ParameterError::Request(Box::new(e))),
        }
    }
}
