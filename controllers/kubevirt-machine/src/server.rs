//! Metrics and probe endpoints
//!
//! - `/metrics`: Prometheus text format
//! - `/healthz`: process is up
//! - `/readyz`: watchers have started

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Shared state of the HTTP server
#[derive(Debug, Clone)]
pub struct ServerState {
    metrics: Metrics,
    ready: Arc<AtomicBool>,
}

impl ServerState {
    /// Create state; not ready until `set_ready` is called
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the controller ready to serve
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

/// Router with all endpoints
pub fn routes(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Serve until the process exits
pub async fn serve(addr: SocketAddr, state: ServerState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("failed to bind {addr}: {e}")))?;
    info!("Serving metrics and probes on {}", addr);
    axum::serve(listener, routes(state))
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz(State(state): State<ServerState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
