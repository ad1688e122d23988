//! # Pod Mutator
//!
//! Decides which containers reference SSM parameters and rewrites them so
//! that resolution happens inside the container at start time.
//!
//! - `container`: per-container rewrite (entrypoint override, mount, flags)
//! - `pod`: staging init container and shared volume
//! - `mappings`: ConfigMap/Secret lookups for `valueFrom` and `envFrom`
//!
//! The mutator holds only immutable configuration and read-only clients, so a
//! single instance serves every admission request concurrently.

mod container;
pub mod mappings;
mod pod;

pub use container::{is_mutated, relocated_args};
pub use mappings::{KubeMappingFetcher, MappingFetcher};
pub use pod::staging_init_container;

use crate::config::WebhookConfig;
use crate::registry::{ImageRegistry, RegistryError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Kind of object an `env` / `envFrom` entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingKind::ConfigMap => f.write_str("ConfigMap"),
            MappingKind::Secret => f.write_str("Secret"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("failed to fetch {kind} {namespace}/{name}: {source}")]
    MappingFetch {
        kind: MappingKind,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("{kind} {namespace}/{name} not found")]
    MappingNotFound {
        kind: MappingKind,
        namespace: String,
        name: String,
    },
    #[error("failed to look up image config for container {container:?}: {source}")]
    ImageConfig {
        container: String,
        #[source]
        source: RegistryError,
    },
}

/// Rewrites pods whose containers reference SSM parameters
#[derive(Clone)]
pub struct Mutator {
    config: Arc<WebhookConfig>,
    mappings: Arc<dyn MappingFetcher>,
    registry: Arc<dyn ImageRegistry>,
}

impl fmt::Debug for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Mutator {
    pub fn new(
        config: Arc<WebhookConfig>,
        mappings: Arc<dyn MappingFetcher>,
        registry: Arc<dyn ImageRegistry>,
    ) -> Self {
        Self {
            config,
            mappings,
            registry,
        }
    }
}
