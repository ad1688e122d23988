//! # Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins when set;
//! otherwise the crate logs at `info`, or `debug` when debug logging is on.
//!
//! The launcher logs to stderr because stdout belongs to the workload it
//! is about to become.

use tracing_subscriber::EnvFilter;

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
}

/// Builds the filter used when `RUST_LOG` is not set
#[must_use]
pub fn default_filter(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!("ssm_secrets_webhook={level},ssm_env={level}")
}

fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug).into())
}

/// Initializes the global subscriber
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging(json: bool, debug: bool, target: LogTarget) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(debug));

    let result = match (json, target) {
        (true, LogTarget::Stdout) => builder.json().try_init(),
        (true, LogTarget::Stderr) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, LogTarget::Stdout) => builder.try_init(),
        (false, LogTarget::Stderr) => builder.with_writer(std::io::stderr).try_init(),
    };

    if let Err(e) = result {
        // Already initialized (tests, or a second call)
        eprintln!("Logging already initialized: {e}");
    }
}
