//! # Admission Handler
//!
//! Turns an `AdmissionReview` into a response: pods are run through the
//! [`Mutator`] and answered with a JSON patch of the changes, every other
//! kind is allowed untouched. Mutation failures deny the request.

use super::mutator::Mutator;
use super::patch::pod_patch;
use super::WebhookState;
use crate::observability::metrics;
use axum::{extract::State, Json};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// The object under admission, by kind
#[derive(Debug)]
pub enum AdmissionObject {
    Pod(Box<Pod>),
    /// Any other kind; never mutated
    Other(String),
}

impl AdmissionObject {
    /// Classifies the request object, returning `None` when there is no object
    pub fn from_request(
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Option<Self>, serde_json::Error> {
        let Some(object) = &request.object else {
            return Ok(None);
        };
        if request.kind.group.is_empty() && request.kind.kind == "Pod" {
            let pod: Pod = serde_json::from_value(serde_json::to_value(object)?)?;
            Ok(Some(AdmissionObject::Pod(Box::new(pod))))
        } else {
            Ok(Some(AdmissionObject::Other(request.kind.kind.clone())))
        }
    }
}

/// Outcome label for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Mutated,
    Unchanged,
    Denied,
    Invalid,
}

impl Outcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Mutated => "mutated",
            Outcome::Unchanged => "unchanged",
            Outcome::Denied => "denied",
            Outcome::Invalid => "invalid",
        }
    }
}

/// axum handler for `POST /pods`
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let start = Instant::now();

    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            metrics::record_admission(Outcome::Invalid.as_str(), start.elapsed().as_secs_f64());
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let (response, outcome) = review(&state.mutator, &request).await;
    metrics::record_admission(outcome.as_str(), start.elapsed().as_secs_f64());
    Json(response.into_review())
}

/// Computes the admission response for a single request
pub async fn review(
    mutator: &Mutator,
    request: &AdmissionRequest<DynamicObject>,
) -> (AdmissionResponse, Outcome) {
    let uid = request.uid.as_str();

    let pod = match AdmissionObject::from_request(request) {
        Ok(Some(AdmissionObject::Pod(pod))) => pod,
        Ok(Some(AdmissionObject::Other(kind))) => {
            debug!(uid, kind = %kind, "Not a pod, allowing unchanged");
            return (AdmissionResponse::from(request), Outcome::Unchanged);
        }
        Ok(None) => {
            debug!(uid, "No object in request, allowing unchanged");
            return (AdmissionResponse::from(request), Outcome::Unchanged);
        }
        Err(e) => {
            error!(uid, error = %e, "Failed to decode pod");
            return (
                AdmissionResponse::from(request).deny(format!("failed to decode pod: {e}")),
                Outcome::Denied,
            );
        }
    };

    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.metadata.namespace.clone())
        .unwrap_or_else(|| "default".to_string());
    let pod_name = pod
        .metadata
        .name
        .clone()
        .or_else(|| pod.metadata.generate_name.clone())
        .unwrap_or_default();

    debug!(uid, namespace = %namespace, pod = %pod_name, dry_run = request.dry_run, "Reviewing pod");

    let mut mutated = (*pod).clone();
    match mutator.mutate_pod(&mut mutated, &namespace).await {
        Ok(false) => (AdmissionResponse::from(request), Outcome::Unchanged),
        Ok(true) => {
            let patch = match pod_patch(&pod, &mutated) {
                Ok(patch) => patch,
                Err(e) => {
                    error!(uid, error = %e, "Failed to serialize pod");
                    return (
                        AdmissionResponse::from(request).deny(format!("failed to serialize pod: {e}")),
                        Outcome::Denied,
                    );
                }
            };
            if patch.0.is_empty() {
                return (AdmissionResponse::from(request), Outcome::Unchanged);
            }

            info!(
                uid,
                namespace = %namespace,
                pod = %pod_name,
                patch_ops = patch.0.len(),
                "Injecting ssm-env into pod"
            );

            match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => (response, Outcome::Mutated),
                Err(e) => {
                    error!(uid, error = %e, "Failed to serialize patch");
                    (
                        AdmissionResponse::from(request).deny(format!("patch serialization error: {e}")),
                        Outcome::Denied,
                    )
                }
            }
        }
        Err(e) => {
            error!(uid, namespace = %namespace, pod = %pod_name, error = %e, "Pod mutation failed");
            (AdmissionResponse::from(request).deny(e.to_string()), Outcome::Denied)
        }
    }
}
