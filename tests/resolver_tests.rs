//! # Environment Resolver Tests
//!
//! Resolution of `ssm:` references against an in-memory parameter store.

mod common;

use common::{env, FakeParameterStore};
use ssm_secrets_webhook::env::{EnvironmentResolver, ResolveError};
use std::sync::Arc;

#[tokio::test]
async fn test_references_resolved_in_order() {
    let store = Arc::new(FakeParameterStore::default().with_parameter("/path/x", "secretval"));
    let mut resolver = EnvironmentResolver::new(store.clone(), false);

    let resolved = resolver
        .resolve(env(&[("A", "plain"), ("B", "ssm:/path/x")]))
        .await
        .unwrap();

    assert_eq!(resolved, env(&[("A", "plain"), ("B", "secretval")]));
    assert_eq!(store.fetch_count("/path/x"), 1);
}

#[tokio::test]
async fn test_missing_parameter_aborts() {
    let store = Arc::new(FakeParameterStore::default());
    let mut resolver = EnvironmentResolver::new(store, false);

    let err = resolver
        .resolve(env(&[("A", "plain"), ("B", "ssm:/path/x")]))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::SecretNotFound { ref key } if key == "/path/x"));
}

#[tokio::test]
async fn test_missing_parameter_dropped_when_ignored() {
    let store = Arc::new(FakeParameterStore::default());
    let mut resolver = EnvironmentResolver::new(store, true);

    let resolved = resolver
        .resolve(env(&[("A", "plain"), ("B", "ssm:/path/x")]))
        .await
        .unwrap();

    assert_eq!(resolved, env(&[("A", "plain")]));
}

#[tokio::test]
async fn test_fetch_failure_aborts_with_key() {
    let store = Arc::new(FakeParameterStore::default().with_failure("/broken"));
    let mut resolver = EnvironmentResolver::new(store, false);

    let err = resolver
        .resolve(env(&[("B", "ssm:/broken")]))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::SecretFetch { ref key, .. } if key == "/broken"));
    assert!(err.to_string().contains("/broken"));
}

#[tokio::test]
async fn test_same_key_fetched_once() {
    let store = Arc::new(FakeParameterStore::default().with_parameter("/shared", "v"));
    let mut resolver = EnvironmentResolver::new(store.clone(), false);

    let resolved = resolver
        .resolve(env(&[("A", "ssm:/shared"), ("B", "ssm:/shared"), ("C", "c")]))
        .await
        .unwrap();

    assert_eq!(resolved, env(&[("A", "v"), ("B", "v"), ("C", "c")]));
    assert_eq!(store.fetch_count("/shared"), 1);
    assert_eq!(resolver.cache().len(), 1);
}

#[tokio::test]
async fn test_failed_key_fetched_once_when_ignored() {
    let store = Arc::new(FakeParameterStore::default().with_failure("/broken"));
    let mut resolver = EnvironmentResolver::new(store.clone(), true);

    let resolved = resolver
        .resolve(env(&[("A", "ssm:/broken"), ("B", "ssm:/broken"), ("C", "c")]))
        .await
        .unwrap();

    assert_eq!(resolved, env(&[("C", "c")]));
    assert_eq!(store.total_fetches(), 1);
}

#[tokio::test]
async fn test_key_passed_through_verbatim() {
    let store = Arc::new(FakeParameterStore::default().with_parameter("secrets", "s3cr3t"));
    let mut resolver = EnvironmentResolver::new(store.clone(), false);

    let resolved = resolver.resolve(env(&[("myvar", "ssm:secrets")])).await.unwrap();

    assert_eq!(resolved, env(&[("myvar", "s3cr3t")]));
    assert_eq!(store.fetch_count("secrets"), 1);
}

#[tokio::test]
async fn test_prefix_is_case_sensitive() {
    let store = Arc::new(FakeParameterStore::default());
    let mut resolver = EnvironmentResolver::new(store.clone(), false);

    let input = env(&[("A", "SSM:/upper"), ("B", " ssm:/leading-space")]);
    let resolved = resolver.resolve(input.clone()).await.unwrap();

    assert_eq!(resolved, input);
    assert_eq!(store.total_fetches(), 0);
}
