//! # Mapping Fetcher
//!
//! Reads ConfigMap and Secret data referenced by container `env` / `envFrom`
//! entries. "Not found" is reported as `Ok(None)` so the rewriter can apply
//! the optional/required rule; every other API failure is an error.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;

/// Source of ConfigMap and Secret data in a namespace
#[async_trait]
pub trait MappingFetcher: Send + Sync {
    /// ConfigMap `data`, or `None` if the ConfigMap does not exist
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error>;

    /// Secret `data` decoded as UTF-8 (lossy), or `None` if the Secret does not exist
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error>;
}

/// [`MappingFetcher`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeMappingFetcher {
    client: Client,
}

impl std::fmt::Debug for KubeMappingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeMappingFetcher").finish_non_exhaustive()
    }
}

impl KubeMappingFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MappingFetcher for KubeMappingFetcher {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "Fetching ConfigMap");
        Ok(api
            .get_opt(name)
            .await?
            .map(|cm| cm.data.unwrap_or_default()))
    }

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "Fetching Secret");
        Ok(api.get_opt(name).await?.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, String::from_utf8_lossy(&value.0).into_owned()))
                .collect()
        }))
    }
}
