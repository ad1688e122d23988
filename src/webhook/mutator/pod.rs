//! # Pod Assembler
//!
//! Rewrites init containers and regular containers independently. When any
//! container was rewritten, the pod also gets the staging init container that
//! copies `ssm-env` into the shared in-memory volume, and the volume itself.

use super::{Mutator, MutationError};
use crate::config::WebhookConfig;
use crate::constants::{
    INIT_CONTAINER_COMMAND, INIT_CONTAINER_CPU, INIT_CONTAINER_MEMORY, INIT_CONTAINER_NAME,
    MOUNT_PATH, VOLUME_NAME,
};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, Pod, PodSecurityContext, ResourceRequirements,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use tracing::debug;

/// Builds the init container that stages the launcher binary
///
/// Inherits `runAsUser` from the pod security context and never allows
/// privilege escalation.
#[must_use]
pub fn staging_init_container(
    config: &WebhookConfig,
    pod_security_context: Option<&PodSecurityContext>,
) -> Container {
    let resources: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity(INIT_CONTAINER_CPU.to_string())),
        ("memory".to_string(), Quantity(INIT_CONTAINER_MEMORY.to_string())),
    ]
    .into_iter()
    .collect();

    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(config.ssm_env_image.clone()),
        image_pull_policy: Some(config.ssm_env_image_pull_policy.clone()),
        command: Some(INIT_CONTAINER_COMMAND.iter().map(ToString::to_string).collect()),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            run_as_user: pod_security_context.and_then(|ctx| ctx.run_as_user),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements {
            requests: Some(resources.clone()),
            limits: Some(resources),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn staging_volume() -> Volume {
    Volume {
        name: VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl Mutator {
    /// Mutates `pod` in place, returning whether anything changed
    ///
    /// On error the pod may be partially rewritten and must be discarded.
    pub async fn mutate_pod(&self, pod: &mut Pod, namespace: &str) -> Result<bool, MutationError> {
        let Some(spec) = pod.spec.as_mut() else {
            return Ok(false);
        };
        // Registry lookups read imagePullSecrets from the unmodified spec
        let snapshot = spec.clone();

        let init_mutated = match spec.init_containers.as_mut() {
            Some(init) => self.rewrite_containers(init, &snapshot, namespace).await?,
            None => false,
        };
        if init_mutated {
            debug!("Successfully mutated pod init containers");
        } else {
            debug!("No pod init containers were mutated");
        }

        let containers_mutated = self
            .rewrite_containers(&mut spec.containers, &snapshot, namespace)
            .await?;
        if containers_mutated {
            debug!("Successfully mutated pod containers");
        } else {
            debug!("No pod containers were mutated");
        }

        if !(init_mutated || containers_mutated) {
            return Ok(false);
        }

        let init_containers = spec.init_containers.get_or_insert_with(Vec::new);
        if !init_containers.iter().any(|c| c.name == INIT_CONTAINER_NAME) {
            init_containers.insert(
                0,
                staging_init_container(&self.config, spec.security_context.as_ref()),
            );
            debug!("Successfully prepended staging init container");
        }

        let volumes = spec.volumes.get_or_insert_with(Vec::new);
        if !volumes.iter().any(|v| v.name == VOLUME_NAME) {
            volumes.push(staging_volume());
            debug!("Successfully appended pod spec volume");
        }

        Ok(true)
    }
}
