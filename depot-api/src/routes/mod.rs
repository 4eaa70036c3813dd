//! REST API Routes Module
//!
//! - Health, readiness and metrics (public)
//! - Public tenant lookup by slug
//! - Tenant-scoped routes under /api/v1: whoami, artifact sealing,
//!   compliance job admin
//!
//! Every route sits behind the tenant middleware; the public allow-list in
//! [`TenantConfig`](crate::config::TenantConfig) decides which ones skip
//! resolution.

pub mod artifact;
pub mod compliance;
pub mod health;
pub mod tenant;

use axum::{middleware::from_fn, middleware::from_fn_with_state, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware::tenant_middleware;
use crate::state::AppState;
use crate::telemetry::observability_middleware;

pub use artifact::create_router as artifact_router;
pub use compliance::create_router as compliance_router;
pub use health::create_router as health_router;
pub use tenant::create_router as tenant_router;

/// Build the complete router.
///
/// # Middleware Order (outer to inner)
/// 1. Trace - request spans from tower-http
/// 2. Observability - latency and status metrics, including rejections
/// 3. Tenant - resolves the tenant or rejects the request
pub fn create_api_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(tenant::create_router())
        .nest("/artifacts", artifact::create_router())
        .nest("/compliance", compliance::create_router());

    Router::new()
        .merge(health::create_router())
        .nest("/api/v1", api_routes)
        .layer(from_fn_with_state(
            state.tenant_middleware_state(),
            tenant_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(observability_middleware)),
        )
        .with_state(state)
}
