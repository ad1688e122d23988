//! # Admission Review Tests
//!
//! Drives the `/pods` endpoint and the `review` function with real
//! AdmissionReview payloads.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use common::{FakeMappings, FakeRegistry};
use http_body_util::BodyExt;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde_json::{json, Value};
use ssm_secrets_webhook::webhook::admission::{review, Outcome};
use ssm_secrets_webhook::webhook::{webhook_router, WebhookState};
use std::sync::Arc;
use tower::ServiceExt;

fn review_body(kind: &str, object: Value) -> Value {
    let (group, resource) = match kind {
        "Pod" => ("", "pods"),
        _ => ("apps", "deployments"),
    };
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": group, "version": "v1", "kind": kind},
            "resource": {"group": group, "version": "v1", "resource": resource},
            "operation": "CREATE",
            "namespace": "default",
            "userInfo": {"username": "admin"},
            "object": object,
            "dryRun": false
        }
    })
}

fn pod_object(env: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "web", "namespace": "default"},
        "spec": {
            "containers": [{
                "name": "web",
                "image": "nginx:1.27",
                "command": ["nginx"],
                "args": ["-g", "daemon off;"],
                "env": env
            }]
        }
    })
}

fn request(body: Value) -> AdmissionRequest<DynamicObject> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(body).unwrap();
    review.try_into().unwrap()
}

fn mutator() -> ssm_secrets_webhook::webhook::mutator::Mutator {
    common::mutator(Arc::new(FakeMappings::default()), Arc::new(FakeRegistry::default()))
}

fn response_json(review: AdmissionReview<DynamicObject>) -> Value {
    serde_json::to_value(review).unwrap()["response"].clone()
}

fn has_patch(response: &Value) -> bool {
    response.get("patch").is_some_and(|p| !p.is_null())
}

fn decoded_patch(response: &Value) -> Vec<Value> {
    let raw: Vec<u8> = match &response["patch"] {
        Value::String(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap(),
        other => serde_json::from_value(other.clone()).unwrap(),
    };
    serde_json::from_slice(&raw).unwrap()
}

#[tokio::test]
async fn test_non_pod_is_allowed_without_patch() {
    let body = review_body(
        "Deployment",
        json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}}),
    );
    let (response, outcome) = review(&mutator(), &request(body)).await;

    assert_eq!(outcome, Outcome::Unchanged);
    let response = response_json(response.into_review());
    assert_eq!(response["allowed"], json!(true));
    assert!(!has_patch(&response));
}

#[tokio::test]
async fn test_pod_without_references_is_allowed_without_patch() {
    let body = review_body("Pod", pod_object(json!([{"name": "LEVEL", "value": "info"}])));
    let (response, outcome) = review(&mutator(), &request(body)).await;

    assert_eq!(outcome, Outcome::Unchanged);
    let response = response_json(response.into_review());
    assert_eq!(response["allowed"], json!(true));
    assert!(!has_patch(&response));
}

#[tokio::test]
async fn test_referencing_pod_gets_json_patch() {
    let body = review_body("Pod", pod_object(json!([{"name": "TOKEN", "value": "ssm:/web/token"}])));
    let (response, outcome) = review(&mutator(), &request(body)).await;

    assert_eq!(outcome, Outcome::Mutated);
    let response = response_json(response.into_review());
    assert_eq!(response["allowed"], json!(true));
    assert_eq!(response["patchType"], json!("JSONPatch"));

    let ops = decoded_patch(&response);
    assert!(!ops.is_empty());

    // Applying the patch to the original yields the rewritten pod
    let mut patched = pod_object(json!([{"name": "TOKEN", "value": "ssm:/web/token"}]));
    let patch: json_patch::Patch = serde_json::from_value(Value::Array(ops)).unwrap();
    json_patch::patch(&mut patched, &patch).unwrap();

    let container = &patched["spec"]["containers"][0];
    assert_eq!(container["command"], json!(["/mutate/ssm-env"]));
    assert_eq!(container["args"], json!(["nginx", "-g", "daemon off;"]));
    assert_eq!(patched["spec"]["initContainers"][0]["name"], json!("copy-ssm-env"));
    assert_eq!(patched["spec"]["volumes"][0]["name"], json!("ssm-env"));
}

#[tokio::test]
async fn test_patch_preserves_fields_unknown_to_the_pod_model() {
    let original = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "web", "namespace": "default"},
        "spec": {
            "initContainers": [
                {
                    "name": "migrate",
                    "image": "app:1",
                    "command": ["/bin/migrate"],
                    "futureField": {"x": 1}
                },
                {
                    "name": "seed",
                    "image": "app:1",
                    "command": ["/bin/seed"],
                    "env": [{"name": "SEED_TOKEN", "value": "ssm:/web/seed"}],
                    "futureField": {"y": 2}
                }
            ],
            "containers": [{
                "name": "web",
                "image": "nginx:1.27",
                "command": ["nginx"],
                "env": [{"name": "TOKEN", "value": "ssm:/web/token"}],
                "futureField": "kept"
            }],
            "volumes": [{"name": "data", "emptyDir": {}, "futureField": true}]
        }
    });
    let (response, outcome) = review(&mutator(), &request(review_body("Pod", original.clone()))).await;
    assert_eq!(outcome, Outcome::Mutated);

    let ops = decoded_patch(&response_json(response.into_review()));
    let patch: json_patch::Patch = serde_json::from_value(Value::Array(ops)).unwrap();
    let mut patched = original;
    json_patch::patch(&mut patched, &patch).unwrap();

    let init = patched["spec"]["initContainers"].as_array().unwrap();
    assert_eq!(init.len(), 3);
    assert_eq!(init[0]["name"], json!("copy-ssm-env"));
    assert!(init[0].get("futureField").is_none());
    assert_eq!(init[1]["name"], json!("migrate"));
    assert_eq!(init[1]["command"], json!(["/bin/migrate"]));
    assert_eq!(init[1]["futureField"], json!({"x": 1}));
    assert_eq!(init[2]["name"], json!("seed"));
    assert_eq!(init[2]["command"], json!(["/mutate/ssm-env"]));
    assert_eq!(init[2]["args"], json!(["/bin/seed"]));
    assert_eq!(init[2]["futureField"], json!({"y": 2}));

    let container = &patched["spec"]["containers"][0];
    assert_eq!(container["command"], json!(["/mutate/ssm-env"]));
    assert_eq!(container["futureField"], json!("kept"));

    let volumes = patched["spec"]["volumes"].as_array().unwrap();
    assert_eq!(volumes.len(), 2);
    assert_eq!(volumes[0]["name"], json!("data"));
    assert_eq!(volumes[0]["futureField"], json!(true));
    assert_eq!(volumes[1]["name"], json!("ssm-env"));
}

#[tokio::test]
async fn test_missing_required_mapping_is_denied() {
    let env = json!([{
        "name": "DB",
        "valueFrom": {"configMapKeyRef": {"name": "absent", "key": "password"}}
    }]);
    let body = review_body("Pod", pod_object(env));
    let (response, outcome) = review(&mutator(), &request(body)).await;

    assert_eq!(outcome, Outcome::Denied);
    let response = response_json(response.into_review());
    assert_eq!(response["allowed"], json!(false));
    assert!(response["status"]["message"]
        .as_str()
        .unwrap()
        .contains("default/absent"));
}

#[tokio::test]
async fn test_pods_endpoint_round_trip() {
    let state = Arc::new(WebhookState::new(mutator()));
    let app = webhook_router(state);

    let body = review_body("Pod", pod_object(json!([{"name": "TOKEN", "value": "ssm:/web/token"}])));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/pods")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let review: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(review["kind"], json!("AdmissionReview"));
    assert_eq!(
        review["response"]["uid"],
        json!("705ab4f5-6393-11e8-b7cc-42010a800002")
    );
    assert_eq!(review["response"]["allowed"], json!(true));
    assert!(has_patch(&review["response"]));
}

#[tokio::test]
async fn test_review_without_request_is_invalid() {
    let state = Arc::new(WebhookState::new(mutator()));
    let app = webhook_router(state);

    let body = json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/pods")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let review: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(review["response"]["allowed"], json!(false));
}
