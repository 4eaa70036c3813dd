//! depot API - HTTP boundary of the artifact repository control plane
//!
//! Resolves every request to a tenant, seals artifacts under per-tenant
//! keys, reports health and readiness, and runs the compliance jobs on
//! their schedules. The collaborators behind it (tenant store, KMS, cache,
//! database) are the traits from `depot-storage`; this crate provides the
//! PostgreSQL and HTTP implementations plus the Axum router.

#[macro_use]
mod macros;

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod health;
pub mod jobs;
pub mod middleware;
pub mod node_prober;
pub mod onboarding;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod tenant;

// Re-export commonly used types
pub use config::{ApiConfig, EncryptionConfig, HealthConfig, StorageNode, TenantConfig};
pub use db::{DbClient, DbConfig, PgComplianceService, PgTenantStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use health::{HealthChecker, HealthReport, ReadinessReport};
pub use jobs::{ComplianceScheduler, JobOutcome, SchedulerConfig, SchedulerStatus};
pub use middleware::{
    tenant_middleware, OperatorAuth, OperatorCredential, TenantExtractor, TenantMiddlewareState,
};
pub use node_prober::HttpNodeProber;
pub use routes::create_api_router;
pub use state::AppState;
pub use tenant::TenantResolver;
