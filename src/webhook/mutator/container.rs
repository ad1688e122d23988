//! # Container Rewriter
//!
//! A container is rewritten when at least one of its environment entries
//! resolves to an `ssm:` reference, whether written literally, pulled from a
//! single ConfigMap/Secret key, or expanded from a whole ConfigMap/Secret via
//! `envFrom`. The rewrite:
//!
//! - moves the effective command line into `args`
//! - sets `command` to the launcher
//! - mounts the shared volume
//! - appends the launcher policy flags as env vars

use super::{MappingKind, Mutator, MutationError};
use crate::constants::{
    ENV_IGNORE_MISSING_SECRETS, ENV_JSON_LOG, LAUNCHER_PATH, MOUNT_PATH, VOLUME_NAME,
};
use crate::observability::metrics;
use crate::reference::is_reference;
use crate::registry::ImageConfig;
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, VolumeMount};
use std::collections::BTreeMap;
use tracing::debug;

/// Returns true if the container already runs the launcher
#[must_use]
pub fn is_mutated(container: &Container) -> bool {
    matches!(container.command.as_deref(), Some([cmd]) if cmd == LAUNCHER_PATH)
}

/// Computes the launcher's `args`: the command line the container would have run
///
/// With an explicit `command`, that command is used and the image is ignored.
/// Otherwise the image entrypoint is used, followed by the image cmd only when
/// the container declares no `args` of its own. The container's `args` always
/// come last.
#[must_use]
pub fn relocated_args(command: &[String], args: &[String], image: Option<&ImageConfig>) -> Vec<String> {
    let mut relocated = command.to_vec();

    if command.is_empty() {
        if let Some(image) = image {
            relocated.extend(image.entrypoint.iter().cloned());
            if args.is_empty() {
                relocated.extend(image.cmd.iter().cloned());
            }
        }
    }

    relocated.extend(args.iter().cloned());
    relocated
}

impl Mutator {
    /// Fetches a ConfigMap or Secret, applying the optional/required rule
    ///
    /// Returns `Ok(None)` only for a missing object behind an optional reference.
    async fn fetch_mapping(
        &self,
        kind: MappingKind,
        namespace: &str,
        name: &str,
        optional: bool,
    ) -> Result<Option<BTreeMap<String, String>>, MutationError> {
        let result = match kind {
            MappingKind::ConfigMap => self.mappings.config_map_data(namespace, name).await,
            MappingKind::Secret => self.mappings.secret_data(namespace, name).await,
        };

        match result {
            Ok(Some(data)) => Ok(Some(data)),
            Ok(None) if optional => {
                debug!(%kind, namespace, name, "Optional reference not found, skipping");
                Ok(None)
            }
            Ok(None) => Err(MutationError::MappingNotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(source) => {
                metrics::increment_mapping_fetch_errors();
                Err(MutationError::MappingFetch {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Collects every env entry of `container` that resolves to an SSM reference
    pub(crate) async fn secret_env_vars(
        &self,
        container: &Container,
        namespace: &str,
    ) -> Result<Vec<EnvVar>, MutationError> {
        let mut found = Vec::new();

        for env_from in container.env_from.iter().flatten() {
            let prefix = env_from.prefix.as_deref().unwrap_or_default();
            let sources = [
                env_from
                    .config_map_ref
                    .as_ref()
                    .map(|r| (MappingKind::ConfigMap, &r.name, r.optional.unwrap_or(false))),
                env_from
                    .secret_ref
                    .as_ref()
                    .map(|r| (MappingKind::Secret, &r.name, r.optional.unwrap_or(false))),
            ];

            for (kind, name, optional) in sources.into_iter().flatten() {
                let Some(data) = self.fetch_mapping(kind, namespace, name, optional).await? else {
                    continue;
                };
                found.extend(
                    data.into_iter()
                        .filter(|(_, value)| is_reference(value))
                        .map(|(key, value)| EnvVar {
                            name: format!("{prefix}{key}"),
                            value: Some(value),
                            ..Default::default()
                        }),
                );
            }
        }

        for env in container.env.iter().flatten() {
            if env.value.as_deref().is_some_and(is_reference) {
                found.push(env.clone());
                continue;
            }

            let Some(source) = &env.value_from else {
                continue;
            };
            let key_ref = source
                .config_map_key_ref
                .as_ref()
                .map(|r| (MappingKind::ConfigMap, &r.name, &r.key, r.optional.unwrap_or(false)))
                .or_else(|| {
                    source
                        .secret_key_ref
                        .as_ref()
                        .map(|r| (MappingKind::Secret, &r.name, &r.key, r.optional.unwrap_or(false)))
                });
            let Some((kind, name, key, optional)) = key_ref else {
                continue;
            };

            let Some(mut data) = self.fetch_mapping(kind, namespace, name, optional).await? else {
                continue;
            };
            if let Some(value) = data.remove(key).filter(|v| is_reference(v)) {
                found.push(EnvVar {
                    name: env.name.clone(),
                    value: Some(value),
                    ..Default::default()
                });
            }
        }

        Ok(found)
    }

    /// Rewrites `container` in place if it references SSM parameters
    ///
    /// Returns whether the container was changed. A container that already
    /// runs the launcher is left alone, so re-admission is a no-op.
    pub async fn rewrite_container(
        &self,
        container: &mut Container,
        pod_spec: &PodSpec,
        namespace: &str,
    ) -> Result<bool, MutationError> {
        if is_mutated(container) {
            debug!(container = %container.name, "Container already runs the launcher");
            return Ok(false);
        }

        let references = self.secret_env_vars(container, namespace).await?;
        if references.is_empty() {
            return Ok(false);
        }

        debug!(
            container = %container.name,
            variables = ?references.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            "Container references SSM parameters"
        );

        let command = container.command.clone().unwrap_or_default();
        let args = container.args.clone().unwrap_or_default();

        let image = if command.is_empty() {
            let image = self
                .registry
                .image_config(namespace, container, pod_spec)
                .await
                .map_err(|source| MutationError::ImageConfig {
                    container: container.name.clone(),
                    source,
                })?;
            Some(image)
        } else {
            None
        };

        container.command = Some(vec![LAUNCHER_PATH.to_string()]);
        container.args = Some(relocated_args(&command, &args, image.as_ref()));

        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: VOLUME_NAME.to_string(),
                mount_path: MOUNT_PATH.to_string(),
                ..Default::default()
            });

        container.env.get_or_insert_with(Vec::new).extend([
            EnvVar {
                name: ENV_IGNORE_MISSING_SECRETS.to_string(),
                value: Some(self.config.ignore_missing_secrets.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: ENV_JSON_LOG.to_string(),
                value: Some(self.config.enable_json_log.to_string()),
                ..Default::default()
            },
        ]);

        metrics::increment_containers_mutated();
        Ok(true)
    }

    /// Rewrites each container of `containers`, returning whether any changed
    pub(crate) async fn rewrite_containers(
        &self,
        containers: &mut [Container],
        pod_spec: &PodSpec,
        namespace: &str,
    ) -> Result<bool, MutationError> {
        let mut mutated = false;
        for container in containers {
            mutated |= self.rewrite_container(container, pod_spec, namespace).await?;
        }
        Ok(mutated)
    }
}
