//! Prometheus Metrics Definitions
//!
//! Defines all depot metrics with their labels and exposes the /metrics
//! endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use depot_core::{HealthStatus, JobKind};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Compliance job duration buckets (seconds). Jobs run from seconds to the
/// 30 minute timeout.
const JOB_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<DepotMetrics>> = Lazy::new(DepotMetrics::new);

/// Registered metrics, or `None` if registration failed at startup.
pub fn metrics() -> Option<&'static DepotMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all depot metrics.
#[derive(Clone)]
pub struct DepotMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Tenant resolutions - labels: source, outcome
    pub tenant_resolutions_total: CounterVec,

    /// Tenant resolver cache lookups - labels: result (hit/miss)
    pub tenant_cache_lookups_total: CounterVec,

    /// Compliance job runs - labels: job, status
    pub compliance_job_runs_total: CounterVec,

    /// Compliance job duration - labels: job
    pub compliance_job_duration_seconds: HistogramVec,

    /// Overall health: 0 healthy, 1 degraded, 2 unhealthy
    pub health_status: Gauge,

    /// Healthy storage replicas as of the last check
    pub healthy_replicas: Gauge,

    /// Encryption operations - labels: operation, status
    pub crypto_operations_total: CounterVec,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl DepotMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "depot_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "depot_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            tenant_resolutions_total: register_counter_vec!(
                "depot_tenant_resolutions_total",
                "Tenant resolutions by signal source and outcome",
                &["source", "outcome"]
            )
            .map_err(|e| registration_error("tenant_resolutions_total", e))?,

            tenant_cache_lookups_total: register_counter_vec!(
                "depot_tenant_cache_lookups_total",
                "Tenant resolver cache lookups",
                &["result"]
            )
            .map_err(|e| registration_error("tenant_cache_lookups_total", e))?,

            compliance_job_runs_total: register_counter_vec!(
                "depot_compliance_job_runs_total",
                "Compliance job runs by job and status",
                &["job", "status"]
            )
            .map_err(|e| registration_error("compliance_job_runs_total", e))?,

            compliance_job_duration_seconds: register_histogram_vec!(
                "depot_compliance_job_duration_seconds",
                "Compliance job duration in seconds",
                &["job"],
                JOB_DURATION_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("compliance_job_duration_seconds", e))?,

            health_status: register_gauge!(
                "depot_health_status",
                "Overall health (0 healthy, 1 degraded, 2 unhealthy)"
            )
            .map_err(|e| registration_error("health_status", e))?,

            healthy_replicas: register_gauge!(
                "depot_healthy_replicas",
                "Healthy storage replicas at the last health check"
            )
            .map_err(|e| registration_error("healthy_replicas", e))?,

            crypto_operations_total: register_counter_vec!(
                "depot_crypto_operations_total",
                "Envelope encryption operations by operation and status",
                &["operation", "status"]
            )
            .map_err(|e| registration_error("crypto_operations_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a tenant resolution attempt.
    pub fn record_tenant_resolution(&self, source: &str, outcome: &str) {
        self.tenant_resolutions_total
            .with_label_values(&[source, outcome])
            .inc();
    }

    /// Record a resolver cache lookup.
    pub fn record_tenant_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.tenant_cache_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record a compliance job run.
    pub fn record_job_run(&self, job: JobKind, status: &str, duration_secs: f64) {
        self.compliance_job_runs_total
            .with_label_values(&[job.as_str(), status])
            .inc();
        self.compliance_job_duration_seconds
            .with_label_values(&[job.as_str()])
            .observe(duration_secs);
    }

    /// Publish the outcome of a health check.
    pub fn set_health(&self, status: HealthStatus, healthy_replicas: usize) {
        self.health_status.set(f64::from(status.severity()));
        self.healthy_replicas.set(healthy_replicas as f64);
    }

    /// Record an encryption operation.
    pub fn record_crypto(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.crypto_operations_total
            .with_label_values(&[operation, status])
            .inc();
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
