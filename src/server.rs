//! # HTTP Server
//!
//! Serves the admission webhook and its probes.
//!
//! Provides endpoints:
//! - `/pods` - Mutating admission webhook (POST)
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/metrics` - Prometheus metrics in text format
//!
//! `/metrics` moves to a separate plain-HTTP listener when
//! `TELEMETRY_LISTEN_ADDRESS` is set. The admission listener serves HTTPS when
//! a certificate and key are configured.

use crate::config::{TlsConfig, WebhookConfig};
use crate::observability::metrics;
use crate::webhook::{webhook_router, WebhookState};
use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Router for the admission listener
///
/// `serve_metrics` is false when metrics have their own listener.
pub fn app_router(state: Arc<WebhookState>, serve_metrics: bool) -> Router {
    let mut app = webhook_router(state).route("/healthz", get(healthz_handler));
    if serve_metrics {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.layer(TraceLayer::new_for_http())
}

/// Router for the separate telemetry listener
pub fn telemetry_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
}

/// Runs every configured listener until one of them fails
pub async fn start_server(config: &WebhookConfig, state: Arc<WebhookState>) -> Result<()> {
    let app = app_router(state, config.telemetry_listen_address.is_none());

    let admission = serve_admission(config.listen_address, config.tls.as_ref(), app);
    match config.telemetry_listen_address {
        Some(addr) => {
            tokio::try_join!(admission, serve_plain(addr, telemetry_router(), "telemetry"))?;
        }
        None => admission.await?,
    }

    Ok(())
}

async fn serve_admission(addr: SocketAddr, tls: Option<&TlsConfig>, app: Router) -> Result<()> {
    let Some(tls) = tls else {
        return serve_plain(addr, app, "admission").await;
    };

    let tls_config = RustlsConfig::from_pem_file(&tls.cert_file, &tls.private_key_file)
        .await
        .with_context(|| {
            format!(
                "Failed to load TLS certificate {} and key {}",
                tls.cert_file.display(),
                tls.private_key_file.display()
            )
        })?;

    info!(addr = %addr, "Admission server listening (HTTPS)");
    axum_server::bind_rustls(addr, tls_config)
        .serve(app.into_make_service())
        .await
        .context("Admission server failed")
}

async fn serve_plain(addr: SocketAddr, app: Router, name: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {name} listener on {addr}"))?;

    info!(addr = %addr, "{} server listening (HTTP)", name);
    axum::serve(listener, app)
        .await
        .with_context(|| format!("{name} server failed"))
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_text() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {e}").into_bytes(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}
