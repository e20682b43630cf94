//! HTTP server for health, metrics and failure endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use q2p_core::health::{HealthCheck, HealthStatus};
use q2p_core::metrics::IngestionMetrics;
use q2p_core::queue::QueueGateway;
use q2p_core::worker::FailureLedger;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Records returned by `/failures` when no limit is given.
const DEFAULT_FAILURE_LIMIT: usize = 50;

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<IngestionMetrics>,
    pub failures: Arc<FailureLedger>,
    /// Queried for the depth gauge on each scrape
    pub queue: Option<Arc<dyn QueueGateway>>,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/failures", get(failures_handler))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn start_server(state: Arc<ServerState>, port: u16, shutdown: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "Failed to bind HTTP server");
            return;
        }
    };

    info!(port, "HTTP server started");

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    match served {
        Ok(()) => info!("HTTP server shut down"),
        Err(e) => error!(error = %e, "HTTP server error"),
    }
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let report = state.health.report();
    let status_code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(report))
}

/// Kubernetes liveness probe handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Kubernetes readiness probe handler.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    // Ready only while the receive loop runs
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if let Some(queue) = &state.queue {
        match queue.depth().await {
            Ok(depth) => state.metrics.set_queue_depth(depth.available),
            Err(e) => debug!(error = %e, "Queue depth unavailable"),
        }
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.export_prometheus_text(),
    )
}

#[derive(Debug, Deserialize)]
struct FailureQuery {
    limit: Option<usize>,
}

/// Recent failure records, newest first.
async fn failures_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<FailureQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_FAILURE_LIMIT);
    Json(serde_json::json!({
        "counts": state.failures.counts(),
        "recent": state.failures.recent(limit),
    }))
}
