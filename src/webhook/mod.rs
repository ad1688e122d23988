//! # Mutating Admission Webhook
//!
//! Intercepts pod creation and rewrites containers whose environment
//! references SSM parameters so that `ssm-env` resolves them at start time.

pub mod admission;
pub mod mutator;
pub mod patch;

use axum::{routing::post, Router};
use mutator::Mutator;
use std::sync::Arc;

/// Shared state for webhook handlers
#[derive(Debug, Clone)]
pub struct WebhookState {
    pub mutator: Mutator,
}

impl WebhookState {
    pub fn new(mutator: Mutator) -> Self {
        Self { mutator }
    }
}

/// Router with the admission endpoints
///
/// - POST /pods - mutate pods referencing SSM parameters
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/pods", post(admission::mutate_handler))
        .with_state(state)
}
