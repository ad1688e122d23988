//! # Configuration
//!
//! Settings for both binaries, loaded once from environment variables at
//! startup and passed by reference afterwards.
//!
//! - `webhook`: [`WebhookConfig`] for the admission server
//! - `launcher`: [`LauncherConfig`] for `ssm-env`
//!
//! Both structs can be built from an arbitrary lookup function so tests never
//! touch the real process environment.

pub mod launcher;
pub mod webhook;

pub use launcher::LauncherConfig;
pub use webhook::{TlsConfig, WebhookConfig};

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address for {key}: {value:?}")]
    InvalidAddress { key: &'static str, value: String },
    #[error("{missing} must be set when {present} is set")]
    IncompleteTls {
        present: &'static str,
        missing: &'static str,
    },
}

/// Read variable as string or return default
fn var_or_default_str(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Read variable as boolean or return default
///
/// Accepts the usual spellings (`true`, `t`, `1`, `yes`, `on`); any other
/// non-empty value is false.
fn var_or_default_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => {
            let v_lower = v.trim().to_lowercase();
            v_lower == "true" || v_lower == "t" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        }
        _ => default,
    }
}

/// Read variable and parse it, falling back to the default on absence or parse failure
fn var_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an optional, non-empty variable
fn var_non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Parses a listen address, accepting the `:port` shorthand for all interfaces
pub fn parse_listen_address(key: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    let candidate = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };
    candidate.parse().map_err(|_| ConfigError::InvalidAddress {
        key,
        value: value.to_string(),
    })
}
