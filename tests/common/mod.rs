//! Shared fakes for integration tests
//!
//! In-memory stand-ins for the cluster API, the image registry and SSM
//! Parameter Store, each recording how often it was called.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ssm_secrets_webhook::config::WebhookConfig;
use ssm_secrets_webhook::env::{ParameterError, ParameterStore};
use ssm_secrets_webhook::registry::{ImageConfig, ImageRegistry, RegistryError};
use ssm_secrets_webhook::webhook::mutator::{MappingFetcher, Mutator};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // Another test binary thread may have installed it already
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// ConfigMaps and Secrets keyed by `(namespace, name)`
#[derive(Debug, Default)]
pub struct FakeMappings {
    config_maps: HashMap<(String, String), BTreeMap<String, String>>,
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
    unreachable: Vec<(String, String)>,
    pub calls: AtomicUsize,
}

impl FakeMappings {
    pub fn with_config_map(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.config_maps
            .insert((namespace.to_string(), name.to_string()), map(data));
        self
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.secrets
            .insert((namespace.to_string(), name.to_string()), map(data));
        self
    }

    /// Makes every lookup of `namespace/name` fail as if the API server were down
    pub fn with_unreachable(mut self, namespace: &str, name: &str) -> Self {
        self.unreachable
            .push((namespace.to_string(), name.to_string()));
        self
    }

    fn lookup(
        &self,
        store: &HashMap<(String, String), BTreeMap<String, String>>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (namespace.to_string(), name.to_string());
        if self.unreachable.contains(&key) {
            return Err(kube::Error::Service(Box::new(std::io::Error::other(
                "connection refused",
            ))));
        }
        Ok(store.get(&key).cloned())
    }
}

#[async_trait]
impl MappingFetcher for FakeMappings {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        self.lookup(&self.config_maps, namespace, name)
    }

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        self.lookup(&self.secrets, namespace, name)
    }
}

/// Image configs keyed by image reference
#[derive(Debug, Default)]
pub struct FakeRegistry {
    images: HashMap<String, ImageConfig>,
    pub calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn with_image(mut self, image: &str, entrypoint: &[&str], cmd: &[&str]) -> Self {
        self.images.insert(
            image.to_string(),
            ImageConfig {
                entrypoint: strings(entrypoint),
                cmd: strings(cmd),
            },
        );
        self
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn image_config(
        &self,
        _namespace: &str,
        container: &Container,
        _pod_spec: &PodSpec,
    ) -> Result<ImageConfig, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let image = container
            .image
            .clone()
            .ok_or_else(|| RegistryError::MissingImage(container.name.clone()))?;
        self.images
            .get(&image)
            .cloned()
            .ok_or(RegistryError::InvalidReference(image))
    }
}

/// Parameter values keyed by name; every fetch is recorded
#[derive(Debug, Default)]
pub struct FakeParameterStore {
    values: HashMap<String, String>,
    failing: Vec<String>,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeParameterStore {
    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    /// Fetching `name` fails with a non-"not found" error
    pub fn with_failure(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    pub fn fetch_count(&self, name: &str) -> usize {
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    pub fn total_fetches(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

#[async_trait]
impl ParameterStore for FakeParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, ParameterError> {
        self.fetched.lock().unwrap().push(name.to_string());
        if self.failing.iter().any(|n| n == name) {
            return Err(ParameterError::MissingValue);
        }
        Ok(self.values.get(name).cloned())
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

pub fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn env(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
    pairs
        .iter()
        .map(|(k, v)| (OsString::from(k), OsString::from(v)))
        .collect()
}

pub fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

pub fn container(name: &str, image: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        ..Default::default()
    }
}

pub fn pod(containers: Vec<Container>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("test-pod".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn mutator(mappings: Arc<FakeMappings>, registry: Arc<FakeRegistry>) -> Mutator {
    mutator_with_config(WebhookConfig::default(), mappings, registry)
}

pub fn mutator_with_config(
    config: WebhookConfig,
    mappings: Arc<FakeMappings>,
    registry: Arc<FakeRegistry>,
) -> Mutator {
    Mutator::new(Arc::new(config), mappings, registry)
}
