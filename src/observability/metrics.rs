//! # Metrics
//!
//! Prometheus metrics for the admission webhook.
//!
//! ## Metrics Exposed
//!
//! - `ssm_webhook_admission_requests_total` - Admission requests by outcome
//! - `ssm_webhook_admission_duration_seconds` - Duration of admission reviews
//! - `ssm_webhook_containers_mutated_total` - Containers rewritten to run `ssm-env`
//! - `ssm_webhook_mapping_fetch_errors_total` - Failed ConfigMap/Secret lookups
//! - `ssm_webhook_image_lookups_total` - Image config lookups by outcome

use anyhow::Result;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "ssm_webhook_admission_requests_total",
            "Total number of admission requests by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

static ADMISSION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "ssm_webhook_admission_duration_seconds",
            "Duration of admission reviews in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )
    .expect("Failed to create ADMISSION_DURATION metric - this should never happen")
});

static CONTAINERS_MUTATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ssm_webhook_containers_mutated_total",
        "Total number of containers rewritten to run ssm-env",
    )
    .expect("Failed to create CONTAINERS_MUTATED_TOTAL metric - this should never happen")
});

static MAPPING_FETCH_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ssm_webhook_mapping_fetch_errors_total",
        "Total number of failed ConfigMap/Secret lookups",
    )
    .expect("Failed to create MAPPING_FETCH_ERRORS_TOTAL metric - this should never happen")
});

static IMAGE_LOOKUPS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "ssm_webhook_image_lookups_total",
            "Total number of image config lookups by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create IMAGE_LOOKUPS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CONTAINERS_MUTATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MAPPING_FETCH_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(IMAGE_LOOKUPS_TOTAL.clone()))?;

    Ok(())
}

/// Encodes every registered metric in the Prometheus text format
pub fn encode_text() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

pub fn record_admission(outcome: &str, duration: f64) {
    ADMISSION_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    ADMISSION_DURATION.observe(duration);
}

pub fn increment_containers_mutated() {
    CONTAINERS_MUTATED_TOTAL.inc();
}

pub fn increment_mapping_fetch_errors() {
    MAPPING_FETCH_ERRORS_TOTAL.inc();
}

pub fn record_image_lookup(success: bool) {
    let outcome = if success { "success" } else { "error" };
    IMAGE_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
}
