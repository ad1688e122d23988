//! # Webhook Configuration
//!
//! Admission server settings loaded from environment variables.

use super::{
    parse_listen_address, var_non_empty, var_or_default_bool, var_or_default_str, ConfigError,
};
use crate::constants::{DEFAULT_IMAGE_PULL_POLICY, DEFAULT_LISTEN_ADDRESS, DEFAULT_SSM_ENV_IMAGE};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Webhook configuration
///
/// All settings have defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Image containing the `ssm-env` binary, used by the staging init container
    pub ssm_env_image: String,
    /// Pull policy of the staging image
    pub ssm_env_image_pull_policy: String,
    /// Propagated into mutated containers as `SSM_IGNORE_MISSING_SECRETS`
    pub ignore_missing_secrets: bool,
    /// Admission listen address
    pub listen_address: SocketAddr,
    /// Separate plain-HTTP listener for `/metrics`; served on the main listener when unset
    pub telemetry_listen_address: Option<SocketAddr>,
    /// Enables debug logging
    pub debug: bool,
    /// JSON log output, also propagated into mutated containers as `SSM_JSON_LOG`
    pub enable_json_log: bool,
    /// Serve HTTPS when set, plain HTTP otherwise
    pub tls: Option<TlsConfig>,
}

/// Certificate and key files for the admission listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub private_key_file: PathBuf,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            ssm_env_image: DEFAULT_SSM_ENV_IMAGE.to_string(),
            ssm_env_image_pull_policy: DEFAULT_IMAGE_PULL_POLICY.to_string(),
            ignore_missing_secrets: false,
            listen_address: SocketAddr::from(([0, 0, 0, 0], 8443)),
            telemetry_listen_address: None,
            debug: false,
            enable_json_log: false,
            tls: None,
        }
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_address = parse_listen_address(
            "LISTEN_ADDRESS",
            &var_or_default_str(&lookup, "LISTEN_ADDRESS", DEFAULT_LISTEN_ADDRESS),
        )?;

        let telemetry_listen_address = var_non_empty(&lookup, "TELEMETRY_LISTEN_ADDRESS")
            .map(|addr| parse_listen_address("TELEMETRY_LISTEN_ADDRESS", &addr))
            .transpose()?;

        let tls = match (
            var_non_empty(&lookup, "TLS_CERT_FILE"),
            var_non_empty(&lookup, "TLS_PRIVATE_KEY_FILE"),
        ) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_file: PathBuf::from(cert),
                private_key_file: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::IncompleteTls {
                    present: "TLS_CERT_FILE",
                    missing: "TLS_PRIVATE_KEY_FILE",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteTls {
                    present: "TLS_PRIVATE_KEY_FILE",
                    missing: "TLS_CERT_FILE",
                })
            }
        };

        Ok(Self {
            ssm_env_image: var_or_default_str(&lookup, "SSM_ENV_IMAGE", DEFAULT_SSM_ENV_IMAGE),
            ssm_env_image_pull_policy: var_or_default_str(
                &lookup,
                "SSM_ENV_IMAGE_PULL_POLICY",
                DEFAULT_IMAGE_PULL_POLICY,
            ),
            ignore_missing_secrets: var_or_default_bool(&lookup, "SSM_IGNORE_MISSING_SECRETS", false),
            listen_address,
            telemetry_listen_address,
            debug: var_or_default_bool(&lookup, "DEBUG", false),
            enable_json_log: var_or_default_bool(&lookup, "ENABLE_JSON_LOG", false),
            tls,
        })
    }
}
