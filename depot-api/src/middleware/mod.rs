//! Middleware for the depot API.
//!
//! - `tenant`: tenant resolution and the tenant-scoped request extractor
//! - `operator`: bearer-token gate for operator-only routes
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/api/v1/whoami", get(handler))
//!     // Tenant resolution wraps every route; public paths pass through.
//!     .layer(middleware::from_fn_with_state(tenant_state, tenant_middleware))
//!     // Metrics see tenant rejections too.
//!     .layer(middleware::from_fn(observability_middleware))
//!     .layer(TraceLayer::new_for_http())
//! ```

mod operator;
mod tenant;

pub use operator::{OperatorAuth, OperatorCredential};
pub use tenant::{extract_subdomain, tenant_middleware, TenantExtractor, TenantMiddlewareState};
