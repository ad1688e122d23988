//! # Image Registry
//!
//! Looks up an image's default `Entrypoint` and `Cmd` so that containers
//! without an explicit `command` can still be wrapped by the launcher.
//!
//! [`RegistryClient`] talks the OCI Distribution v2 protocol directly:
//!
//! 1. Fetch the manifest (resolving a multi-platform index to `linux/amd64`)
//! 2. Fetch the config blob the manifest points at
//! 3. Read `config.Entrypoint` / `config.Cmd`
//!
//! Registries answering `401` are retried with a bearer token (anonymous, or
//! with credentials from the pod's `imagePullSecrets`) or with basic auth.

use crate::constants::REGISTRY_TIMEOUT_SECS;
use crate::observability::metrics;
use crate::webhook::mutator::MappingFetcher;
use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_HOST: &str = "registry-1.docker.io";

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json";

/// The parts of an image configuration the rewriter needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid image reference: {0:?}")]
    InvalidReference(String),
    #[error("container {0:?} has no image")]
    MissingImage(String),
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("unsupported manifest for {0}")]
    UnsupportedManifest(String),
    #[error("failed to read image pull secret {name}: {source}")]
    PullSecret {
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Source of image metadata
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn image_config(
        &self,
        namespace: &str,
        container: &Container,
        pod_spec: &PodSpec,
    ) -> Result<ImageConfig, RegistryError>;
}

/// A parsed `[registry/]repository[:tag][@digest]` image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry name as written (`docker.io` when omitted)
    pub registry: String,
    pub repository: String,
    /// Tag or digest
    pub reference: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let image = image.trim();
        if image.is_empty() || image.contains(char::is_whitespace) {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (image, None),
        };

        let (registry, remainder) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest)
            }
            _ => (DOCKER_HUB.to_string(), name),
        };

        let (repository, tag) = match remainder.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
            _ => (remainder, None),
        };

        if repository.is_empty() {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository.to_string()
        };

        let reference = digest
            .or(tag)
            .unwrap_or("latest")
            .to_string();

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    /// Host serving the v2 API for this registry
    pub fn api_host(&self) -> &str {
        if self.registry == DOCKER_HUB {
            DOCKER_HUB_HOST
        } else {
            &self.registry
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl DockerAuthEntry {
    fn credentials(&self) -> Option<Credentials> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            });
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(self.auth.as_deref()?)
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Normalizes a docker config `auths` key to a bare registry name
fn normalize_registry_key(key: &str) -> String {
    let key = key
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = key.split('/').next().unwrap_or(key);
    match host {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DOCKER_HUB.to_string()
        }
        other => other.to_string(),
    }
}

/// Finds credentials for `registry` in `.dockerconfigjson` / `.dockercfg` secret data
fn credentials_from_secret(data: &BTreeMap<String, String>, registry: &str) -> Option<Credentials> {
    let auths = if let Some(raw) = data.get(".dockerconfigjson") {
        serde_json::from_str::<DockerConfigJson>(raw).ok()?.auths
    } else if let Some(raw) = data.get(".dockercfg") {
        serde_json::from_str::<HashMap<String, DockerAuthEntry>>(raw).ok()?
    } else {
        return None;
    };

    auths
        .iter()
        .find(|(key, _)| normalize_registry_key(key) == registry)
        .and_then(|(_, entry)| entry.credentials())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    manifests: Option<Vec<ManifestDescriptor>>,
    #[serde(default)]
    config: Option<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct ManifestDescriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: Option<RuntimeConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimeConfig {
    #[serde(rename = "Entrypoint", default)]
    entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    cmd: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

/// Parses a `WWW-Authenticate` header value
fn parse_challenge(header: &str) -> Option<Challenge> {
    let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut values = HashMap::new();
    for part in split_challenge_params(params) {
        if let Some((key, value)) = part.split_once('=') {
            values.insert(
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }

    Some(Challenge::Bearer {
        realm: values.remove("realm")?,
        service: values.remove("service"),
        scope: values.remove("scope"),
    })
}

/// Splits on commas outside quotes (scopes may contain commas)
fn split_challenge_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in params.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&params[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}

enum Authorization {
    Anonymous,
    Bearer(String),
    Basic(Credentials),
}

/// [`ImageRegistry`] speaking the OCI Distribution v2 API
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    mappings: Arc<dyn MappingFetcher>,
    insecure_registries: Vec<String>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("insecure_registries", &self.insecure_registries)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    pub fn new(mappings: Arc<dyn MappingFetcher>) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REGISTRY_TIMEOUT_SECS))
            .user_agent(concat!("ssm-secrets-webhook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            mappings,
            insecure_registries: Vec::new(),
        })
    }

    /// Talk plain HTTP to `registry` (e.g. an in-cluster registry on `localhost:5000`)
    #[must_use]
    pub fn with_insecure_registry(mut self, registry: impl Into<String>) -> Self {
        self.insecure_registries.push(registry.into());
        self
    }

    fn base_url(&self, image: &ImageReference) -> String {
        let scheme = if self.insecure_registries.iter().any(|r| r == &image.registry) {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{}/v2/{}", image.api_host(), image.repository)
    }

    async fn pull_credentials(
        &self,
        namespace: &str,
        pod_spec: &PodSpec,
        registry: &str,
    ) -> Result<Option<Credentials>, RegistryError> {
        for secret_ref in pod_spec.image_pull_secrets.iter().flatten() {
            let data = self
                .mappings
                .secret_data(namespace, &secret_ref.name)
                .await
                .map_err(|source| RegistryError::PullSecret {
                    name: secret_ref.name.clone(),
                    source,
                })?;
            let Some(data) = data else {
                warn!(namespace, secret = %secret_ref.name, "Image pull secret not found, skipping");
                continue;
            };
            if let Some(credentials) = credentials_from_secret(&data, registry) {
                debug!(registry, secret = %secret_ref.name, "Using image pull secret");
                return Ok(Some(credentials));
            }
        }
        Ok(None)
    }

    async fn send(
        &self,
        url: &str,
        auth: &Authorization,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let request = self.http.get(url).header(ACCEPT, MANIFEST_MEDIA_TYPES);
        let request = match auth {
            Authorization::Anonymous => request,
            Authorization::Bearer(token) => request.bearer_auth(token),
            Authorization::Basic(creds) => {
                request.basic_auth(&creds.username, Some(&creds.password))
            }
        };
        request.send().await
    }

    /// Answers a `401` challenge, returning the authorization to retry with
    async fn authorize(
        &self,
        response: &reqwest::Response,
        image: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<Option<Authorization>, RegistryError> {
        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_challenge)
        else {
            return Ok(None);
        };

        match challenge {
            Challenge::Basic => Ok(credentials.cloned().map(Authorization::Basic)),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let scope =
                    scope.unwrap_or_else(|| format!("repository:{}:pull", image.repository));
                let mut query = vec![("scope", scope)];
                if let Some(service) = service {
                    query.push(("service", service));
                }
                let mut request = self.http.get(&realm).query(&query);
                if let Some(creds) = credentials {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(RegistryError::Status {
                        url: realm,
                        status: response.status(),
                    });
                }
                let token: TokenResponse = response.json().await?;
                Ok(token
                    .token
                    .or(token.access_token)
                    .map(Authorization::Bearer))
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        auth: &mut Authorization,
        image: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<T, RegistryError> {
        let mut response = self.send(url, auth).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(retry) = self.authorize(&response, image, credentials).await? {
                *auth = retry;
                response = self.send(url, auth).await?;
            }
        }
        if !response.status().is_success() {
            return Err(RegistryError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        // Registries label blobs application/octet-stream; parse the body ourselves
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| RegistryError::UnsupportedManifest(format!("{url}: {e}")))
    }

    async fn fetch_image_config(
        &self,
        image: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<ImageConfig, RegistryError> {
        let base = self.base_url(image);
        let mut auth = Authorization::Anonymous;

        let manifest_url = format!("{base}/manifests/{}", image.reference);
        let mut manifest: Manifest = self
            .get_json(&manifest_url, &mut auth, image, credentials)
            .await?;

        if let Some(entries) = manifest.manifests.take() {
            let chosen = entries
                .iter()
                .find(|m| {
                    m.platform
                        .as_ref()
                        .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
                })
                .or_else(|| entries.first())
                .ok_or_else(|| RegistryError::UnsupportedManifest(manifest_url.clone()))?;
            let platform_url = format!("{base}/manifests/{}", chosen.digest);
            manifest = self
                .get_json(&platform_url, &mut auth, image, credentials)
                .await?;
        }

        let config_digest = manifest
            .config
            .ok_or_else(|| RegistryError::UnsupportedManifest(manifest_url.clone()))?
            .digest;
        let blob: ConfigBlob = self
            .get_json(
                &format!("{base}/blobs/{config_digest}"),
                &mut auth,
                image,
                credentials,
            )
            .await?;

        let runtime = blob.config.unwrap_or_default();
        Ok(ImageConfig {
            entrypoint: runtime.entrypoint.unwrap_or_default(),
            cmd: runtime.cmd.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    async fn image_config(
        &self,
        namespace: &str,
        container: &Container,
        pod_spec: &PodSpec,
    ) -> Result<ImageConfig, RegistryError> {
        let image = container
            .image
            .as_deref()
            .ok_or_else(|| RegistryError::MissingImage(container.name.clone()))?;
        let reference = ImageReference::parse(image)?;
        let credentials = self
            .pull_credentials(namespace, pod_spec, &reference.registry)
            .await?;

        debug!(
            image,
            registry = %reference.registry,
            authenticated = credentials.is_some(),
            "Looking up image config"
        );

        let result = self.fetch_image_config(&reference, credentials.as_ref()).await;
        metrics::record_image_lookup(result.is_ok());
        result
    }
}
