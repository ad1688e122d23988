//! # Observability
//!
//! - `logging`: tracing subscriber setup shared by both binaries
//! - `metrics`: Prometheus metrics for the webhook

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogTarget};
