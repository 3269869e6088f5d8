//! Probe and metrics endpoints.
//!
//! Serves the operator's HTTP surface: `/healthz` for liveness, `/readyz`
//! for readiness (503 until the controller loop is up), and `/metrics` in
//! Prometheus text format. Everything here is read-only; reconcile state
//! lives elsewhere.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Readiness flag shared between main and the probe handlers.
#[derive(Default)]
pub struct ServerState {
    ready: AtomicBool,
}

impl ServerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Flip `/readyz` to 200. Called once the controller loop is running.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

pub async fn serve(port: u16, state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "probe server listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(ready))
        .route("/metrics", get(export_metrics))
        .with_state(state)
}

async fn ready(State(state): State<Arc<ServerState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn export_metrics() -> (StatusCode, [(header::HeaderName, &'static str); 1], Vec<u8>) {
    match render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("failed to encode metrics: {err}").into_bytes(),
        ),
    }
}

fn render_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let mut body = Vec::new();
    TextEncoder::new().encode(&crate::metrics::REGISTRY.gather(), &mut body)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_starts_false() {
        let state = ServerState::new();
        assert!(!state.is_ready());

        state.mark_ready();
        assert!(state.is_ready());
    }

    #[test]
    fn metrics_render_as_prometheus_text() {
        let body = render_metrics().unwrap();
        // Encoding an (possibly empty) registry must not fail
        assert!(String::from_utf8(body).is_ok());
    }
}
