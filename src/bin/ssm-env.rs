//! # ssm-env
//!
//! Container entrypoint injected by the webhook. Resolves `ssm:` references
//! in its environment against SSM Parameter Store, then replaces itself with
//! the command given as its arguments.
//!
//! Any fatal condition exits with status 1 before the workload starts.

use anyhow::{Context, Result};
use ssm_secrets_webhook::config::LauncherConfig;
use ssm_secrets_webhook::constants::EC2_METADATA_ENDPOINT;
use ssm_secrets_webhook::env::{resolve_region, EnvironmentResolver, SsmParameterStore};
use ssm_secrets_webhook::launcher::Workload;
use ssm_secrets_webhook::observability::{init_logging, LogTarget};
use std::sync::Arc;
use tracing::error;

fn main() {
    let config = LauncherConfig::from_env();
    init_logging(config.json_log, false, LogTarget::Stderr);

    if let Err(e) = run(&config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(config: &LauncherConfig) -> Result<()> {
    let workload = Workload::from_args(std::env::args_os())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let environment = runtime
        .block_on(resolve_environment(config))
        .context("Failed to inject secrets from SSM")?;
    drop(runtime);

    match workload.exec(environment)? {}
}

async fn resolve_environment(
    config: &LauncherConfig,
) -> Result<Vec<(std::ffi::OsString, std::ffi::OsString)>> {
    let region = resolve_region(config.region.as_deref(), EC2_METADATA_ENDPOINT).await?;
    let store = Arc::new(SsmParameterStore::new(&region).await);

    let mut resolver = EnvironmentResolver::new(store, config.ignore_missing_secrets)
        .with_fetch_timeout(config.fetch_timeout);
    let environment = resolver.resolve(std::env::vars_os()).await?;
    Ok(environment)
}
