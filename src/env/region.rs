//! # Region Discovery
//!
//! The region is taken from configuration (`AWS_REGION`, then
//! `AWS_DEFAULT_REGION`) and otherwise from the `region` field of the EC2
//! instance identity document. An IMDSv2 session token is requested first;
//! instances that only serve IMDSv1 are queried without one.

use super::resolver::ResolveError;
use crate::constants::{
    EC2_IDENTITY_DOCUMENT_PATH, EC2_METADATA_TOKEN_PATH, INSTANCE_METADATA_TIMEOUT_SECS,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECS: &str = "60";

#[derive(Debug, Deserialize)]
struct IdentityDocument {
    #[serde(default)]
    region: String,
}

/// Returns the active region, consulting instance metadata only when unconfigured
///
/// Fails with [`ResolveError::ConfigurationMissing`] when neither source
/// yields a non-empty region.
pub async fn resolve_region(
    configured: Option<&str>,
    metadata_endpoint: &str,
) -> Result<String, ResolveError> {
    if let Some(region) = configured.filter(|r| !r.trim().is_empty()) {
        debug!(region, "Using configured region");
        return Ok(region.to_string());
    }

    info!(endpoint = metadata_endpoint, "No region configured, querying instance metadata");
    match region_from_instance_metadata(metadata_endpoint).await {
        Ok(Some(region)) => {
            info!(region = %region, "Discovered region from instance metadata");
            Ok(region)
        }
        Ok(None) => {
            warn!("Instance identity document has no region");
            Err(ResolveError::ConfigurationMissing)
        }
        Err(e) => {
            warn!(error = %e, "Failed to read instance identity document");
            Err(ResolveError::ConfigurationMissing)
        }
    }
}

/// Reads the `region` field of the instance identity document
///
/// Returns `Ok(None)` when the document parses but carries no region. A body
/// that is not a JSON object is treated the same way.
pub async fn region_from_instance_metadata(
    metadata_endpoint: &str,
) -> Result<Option<String>, reqwest::Error> {
    let endpoint = metadata_endpoint.trim_end_matches('/');
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(INSTANCE_METADATA_TIMEOUT_SECS))
        .build()?;

    let token = match http
        .put(format!("{endpoint}{EC2_METADATA_TOKEN_PATH}"))
        .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
    {
        Ok(response) => response.text().await.ok(),
        Err(e) => {
            debug!(error = %e, "IMDSv2 token unavailable, falling back to IMDSv1");
            None
        }
    };

    let mut request = http.get(format!("{endpoint}{EC2_IDENTITY_DOCUMENT_PATH}"));
    if let Some(token) = &token {
        request = request.header(TOKEN_HEADER, token);
    }
    let body = request.send().await?.error_for_status()?.text().await?;

    match serde_json::from_str::<IdentityDocument>(&body) {
        Ok(document) if !document.region.trim().is_empty() => Ok(Some(document.region)),
        Ok(_) => Ok(None),
        Err(e) => {
            warn!(error = %e, "Instance identity document is not valid JSON, skipping");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_configured_region_wins() {
        // Unroutable endpoint: must not be contacted
        let region = resolve_region(Some("eu-west-1"), "http://127.0.0.1:1").await.unwrap();
        assert_eq!(region, "eu-west-1");
    }

    #[tokio::test]
    async fn test_blank_configured_region_is_ignored() {
        let result = resolve_region(Some("  "), "http://127.0.0.1:1").await;
        assert!(matches!(result, Err(ResolveError::ConfigurationMissing)));
    }
}
