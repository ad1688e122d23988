//! # Environment Resolver
//!
//! Walks the process environment in order and replaces every `ssm:` reference
//! with the decrypted parameter value. Each distinct key is fetched at most
//! once per run, failures included.
//!
//! Unresolvable references abort the run unless missing secrets are ignored,
//! in which case the variable is logged by key and dropped. Values are never
//! logged.

use super::parameter::{ParameterError, ParameterStore};
use crate::reference::extract_key;
use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};
use zeroize::{Zeroize, Zeroizing};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no AWS region configured and none found in instance metadata")]
    ConfigurationMissing,
    #[error("parameter {key:?} not found")]
    SecretNotFound { key: String },
    #[error("failed to read parameter {key:?}: {source}")]
    SecretFetch {
        key: String,
        #[source]
        source: ParameterError,
    },
}

/// Results of parameter lookups for the lifetime of one resolution pass
///
/// `None` records a key that could not be resolved, so it is not retried.
#[derive(Default)]
pub struct ParameterCache {
    entries: HashMap<String, Option<Zeroizing<String>>>,
}

impl std::fmt::Debug for ParameterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterCache")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ParameterCache {
    /// Cached outcome for `key`: outer `None` is a miss, inner `None` a cached failure
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries.get(key).map(|v| v.as_deref().map(String::as_str))
    }

    pub fn insert(&mut self, key: &str, value: Option<Zeroizing<String>>) {
        self.entries.insert(key.to_string(), value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rewrites an environment by resolving its `ssm:` references
pub struct EnvironmentResolver {
    store: Arc<dyn ParameterStore>,
    ignore_missing: bool,
    fetch_timeout: Option<Duration>,
    cache: ParameterCache,
}

impl std::fmt::Debug for EnvironmentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentResolver")
            .field("ignore_missing", &self.ignore_missing)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl EnvironmentResolver {
    pub fn new(store: Arc<dyn ParameterStore>, ignore_missing: bool) -> Self {
        Self {
            store,
            ignore_missing,
            fetch_timeout: None,
            cache: ParameterCache::default(),
        }
    }

    /// Bounds every remote fetch; a fetch exceeding it fails like any other
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &ParameterCache {
        &self.cache
    }

    /// Resolves `environment`, preserving order
    ///
    /// Entries that are not valid UTF-8 pass through untouched. On error no
    /// partial environment is returned and the values resolved so far are
    /// wiped. The returned values are plain `OsString`s handed to `exec`, so
    /// they are not wiped on success.
    pub async fn resolve<I>(&mut self, environment: I) -> Result<Vec<(OsString, OsString)>, ResolveError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut resolved = Vec::new();

        for (name, value) in environment {
            let key = match (name.to_str(), value.to_str().and_then(extract_key)) {
                (Some(_), Some(key)) => Some(key.to_string()),
                _ => None,
            };
            let Some(key) = key else {
                resolved.push((name, value));
                continue;
            };

            match self.lookup(&key).await {
                Ok(secret) => resolved.push((name, OsString::from(secret.as_str()))),
                Err(e) if self.ignore_missing => {
                    error!(
                        variable = %name.to_string_lossy(),
                        key = %key,
                        error = %e,
                        "Failed to resolve parameter, dropping variable"
                    );
                }
                Err(e) => {
                    wipe_environment(&mut resolved);
                    return Err(e);
                }
            }
        }

        Ok(resolved)
    }

    async fn lookup(&mut self, key: &str) -> Result<Zeroizing<String>, ResolveError> {
        if let Some(cached) = self.cache.get(key) {
            debug!(key, "Parameter cache hit");
            return cached
                .map(|v| Zeroizing::new(v.to_string()))
                .ok_or_else(|| ResolveError::SecretNotFound { key: key.to_string() });
        }

        let result = self.fetch(key).await;
        self.cache
            .insert(key, result.as_ref().ok().map(|v| Zeroizing::new(v.to_string())));
        result
    }

    async fn fetch(&self, key: &str) -> Result<Zeroizing<String>, ResolveError> {
        if key.is_empty() {
            return Err(ResolveError::SecretNotFound { key: String::new() });
        }

        debug!(key, "Fetching parameter");
        let request = self.store.get_parameter(key);
        let response = match self.fetch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, request)
                .await
                .unwrap_or(Err(ParameterError::Timeout(timeout))),
            None => request.await,
        };

        match response {
            Ok(Some(value)) => Ok(Zeroizing::new(value)),
            Ok(None) => Err(ResolveError::SecretNotFound { key: key.to_string() }),
            Err(source) => Err(ResolveError::SecretFetch {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Zeroes every value of `environment` and empties it
fn wipe_environment(environment: &mut Vec<(OsString, OsString)>) {
    for (_, value) in environment.drain(..) {
        let mut bytes = value.into_vec();
        bytes.zeroize();
    }
}
