//! # SSM Secrets Webhook
//!
//! Mutating admission webhook that injects `ssm-env` into pods referencing
//! SSM Parameter Store values.

use anyhow::{Context, Result};
use ssm_secrets_webhook::config::WebhookConfig;
use ssm_secrets_webhook::observability::{init_logging, metrics, LogTarget};
use ssm_secrets_webhook::registry::RegistryClient;
use ssm_secrets_webhook::server::start_server;
use ssm_secrets_webhook::webhook::mutator::{KubeMappingFetcher, Mutator};
use ssm_secrets_webhook::webhook::WebhookState;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS client or server is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = WebhookConfig::from_env().context("Invalid webhook configuration")?;
    init_logging(config.enable_json_log, config.debug, LogTarget::Stdout);

    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        listen_address = %config.listen_address,
        telemetry_listen_address = ?config.telemetry_listen_address,
        tls = config.tls.is_some(),
        ssm_env_image = %config.ssm_env_image,
        ignore_missing_secrets = config.ignore_missing_secrets,
        "Starting ssm-secrets-webhook"
    );

    metrics::register_metrics()?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let mappings = Arc::new(KubeMappingFetcher::new(client));
    let registry = Arc::new(RegistryClient::new(mappings.clone()).context("Failed to create registry client")?);

    let config = Arc::new(config);
    let mutator = Mutator::new(config.clone(), mappings, registry);
    let state = Arc::new(WebhookState::new(mutator));

    start_server(&config, state).await
}
