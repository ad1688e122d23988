//! # Launcher Configuration
//!
//! Settings read by `ssm-env` from its own environment. The webhook injects
//! `SSM_IGNORE_MISSING_SECRETS` and `SSM_JSON_LOG` into every mutated container.

use super::{var_non_empty, var_or_default, var_or_default_bool};
use crate::constants::{
    DEFAULT_FETCH_TIMEOUT_SECS, ENV_FETCH_TIMEOUT_SECS, ENV_IGNORE_MISSING_SECRETS, ENV_JSON_LOG,
};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Drop unresolvable references instead of aborting
    pub ignore_missing_secrets: bool,
    /// JSON log output
    pub json_log: bool,
    /// Explicit region; instance metadata is consulted when unset
    pub region: Option<String>,
    /// Deadline for each parameter fetch; `None` waits indefinitely
    pub fetch_timeout: Option<Duration>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            ignore_missing_secrets: false,
            json_log: false,
            region: None,
            fetch_timeout: Some(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)),
        }
    }
}

impl LauncherConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let timeout_secs = var_or_default(&lookup, ENV_FETCH_TIMEOUT_SECS, DEFAULT_FETCH_TIMEOUT_SECS);

        Self {
            ignore_missing_secrets: var_or_default_bool(&lookup, ENV_IGNORE_MISSING_SECRETS, false),
            json_log: var_or_default_bool(&lookup, ENV_JSON_LOG, false),
            region: var_non_empty(&lookup, "AWS_REGION")
                .or_else(|| var_non_empty(&lookup, "AWS_DEFAULT_REGION")),
            fetch_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }
}
