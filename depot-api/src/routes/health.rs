//! Health Check Endpoints
//!
//! - /health - cached aggregate report (database, cache, replication)
//! - /health/ready - readiness gate with named checks
//! - /health/live - process liveness
//! - /health/ping - plain pong
//!
//! No tenant required for any of these.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use depot_core::HealthStatus;
use serde::Serialize;

use crate::health::{HealthChecker, HealthReport};
use crate::state::AppState;
use crate::telemetry::metrics_handler;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub message: &'static str,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    let response = LivenessResponse {
        status: HealthStatus::Healthy,
        message: "Process is alive",
    };
    (StatusCode::OK, Json(response))
}

/// GET /health - serves the cached report; 503 only when unhealthy.
pub async fn health(
    State(checker): State<Arc<HealthChecker>>,
    State(start_time): State<std::time::Instant>,
) -> impl IntoResponse {
    let report = checker.current_health().await;
    let status_code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };

    let response = HealthResponse {
        report,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: start_time.elapsed().as_secs(),
    };
    (status_code, Json(response))
}

/// GET /health/ready
pub async fn readiness(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let report = checker.verify_readiness().await;
    let status_code = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(report))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Health and metrics routes. All of them sit on the public allow-list.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ping", get(ping))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics_handler))
}
