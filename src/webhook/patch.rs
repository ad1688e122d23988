//! # Pod Patch
//!
//! Builds the JSON patch that turns the admitted pod into the mutated one.
//!
//! The pod is decoded into the typed model, which drops any field the pinned
//! API version does not know. Diffing whole pods would therefore shift those
//! fields between array elements whenever the staging container is prepended.
//! Instead, rewritten containers are diffed element by element at their
//! original index and the staging container and volume are added with
//! explicit `add` operations, so the patch never touches anything else.

use crate::constants::{INIT_CONTAINER_NAME, VOLUME_NAME};
use json_patch::Patch;
use k8s_openapi::api::core::v1::{Container, Pod, Volume};
use serde_json::{json, Value};

/// Computes the patch from `before` to `after`, where `after` is the result
/// of mutating `before`
pub fn pod_patch(before: &Pod, after: &Pod) -> Result<Patch, serde_json::Error> {
    let (Some(old), Some(new)) = (&before.spec, &after.spec) else {
        return Ok(Patch(Vec::new()));
    };
    let mut operations = Vec::new();

    container_operations(
        &mut operations,
        "/spec/containers",
        &old.containers,
        &new.containers,
    )?;

    let old_init = old.init_containers.as_deref().unwrap_or_default();
    let new_init = new.init_containers.as_deref().unwrap_or_default();
    let staging = match new_init.split_first() {
        Some((first, rest))
            if first.name == INIT_CONTAINER_NAME && rest.len() == old_init.len() =>
        {
            Some((first, rest))
        }
        _ => None,
    };
    let rewritten_init = staging.map_or(new_init, |(_, rest)| rest);
    container_operations(
        &mut operations,
        "/spec/initContainers",
        old_init,
        rewritten_init,
    )?;
    if let Some((container, _)) = staging {
        let value = serde_json::to_value(container)?;
        operations.push(match old.init_containers {
            Some(_) => json!({"op": "add", "path": "/spec/initContainers/0", "value": value}),
            None => json!({"op": "add", "path": "/spec/initContainers", "value": [value]}),
        });
    }

    let old_volumes = old.volumes.as_deref().unwrap_or_default();
    let new_volumes = new.volumes.as_deref().unwrap_or_default();
    if let Some(volume) = appended_volume(old_volumes, new_volumes) {
        let value = serde_json::to_value(volume)?;
        operations.push(match old.volumes {
            Some(_) => json!({"op": "add", "path": "/spec/volumes/-", "value": value}),
            None => json!({"op": "add", "path": "/spec/volumes", "value": [value]}),
        });
    }

    serde_json::from_value(Value::Array(operations))
}

/// Diffs each rewritten container against its original and rebases the
/// operations onto `base/<index>`
fn container_operations(
    operations: &mut Vec<Value>,
    base: &str,
    before: &[Container],
    after: &[Container],
) -> Result<(), serde_json::Error> {
    for (index, (old, new)) in before.iter().zip(after).enumerate() {
        if old == new {
            continue;
        }
        let diff = json_patch::diff(&serde_json::to_value(old)?, &serde_json::to_value(new)?);
        let Value::Array(diff) = serde_json::to_value(diff)? else {
            continue;
        };
        for mut operation in diff {
            if let Some(path) = operation.get_mut("path") {
                let rebased = format!("{base}/{index}{}", path.as_str().unwrap_or_default());
                *path = Value::String(rebased);
            }
            operations.push(operation);
        }
    }
    Ok(())
}

fn appended_volume<'a>(before: &[Volume], after: &'a [Volume]) -> Option<&'a Volume> {
    match after.split_last() {
        Some((last, rest)) if last.name == VOLUME_NAME && rest.len() == before.len() => Some(last),
        _ => None,
    }
}
