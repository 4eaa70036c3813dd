//! Constants for the depot API
//!
//! Defaults for every environment-driven setting live here so they are easy
//! to find and test.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind address when neither `DEPOT_API_BIND` nor a port is set.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

// ============================================================================
// TENANT RESOLUTION
// ============================================================================

/// Header carrying an explicit tenant slug.
pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-slug";

/// Response header echoing the resolved tenant id.
pub const TENANT_ID_RESPONSE_HEADER: &str = "x-tenant-id";

/// Response header echoing the resolved tenant slug.
pub const TENANT_SLUG_RESPONSE_HEADER: &str = "x-tenant-slug";

/// Tenant cache TTL in seconds (5 minutes).
pub const DEFAULT_TENANT_CACHE_TTL_SECS: u64 = 300;

/// Tenant cache sweep interval in seconds.
pub const DEFAULT_TENANT_CACHE_SWEEP_SECS: u64 = 60;

/// Paths that never require a tenant. A trailing `/*` matches any suffix.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/health/*",
    "/metrics",
    "/api/v1/auth/login",
    "/api/v1/tenants/lookup/*",
];

// ============================================================================
// ENCRYPTION
// ============================================================================

/// Key cache TTL in seconds.
pub const DEFAULT_KEY_CACHE_TTL_SECS: u64 = 300;

/// Key cache sweep interval in seconds.
pub const DEFAULT_KEY_CACHE_SWEEP_SECS: u64 = 60;

// ============================================================================
// HEALTH
// ============================================================================

/// How often the cached health report is refreshed.
pub const DEFAULT_HEALTH_REFRESH_SECS: u64 = 15;

/// Overall deadline for one health check.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Deadline for the readiness ping.
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 3;

/// Replication lag above which the database is reported degraded.
pub const DEFAULT_MAX_REPLICATION_LAG_SECS: u64 = 30;

/// Storage node probe interval.
pub const DEFAULT_NODE_PROBE_INTERVAL_SECS: u64 = 10;

/// Per-node probe deadline.
pub const DEFAULT_NODE_PROBE_TIMEOUT_SECS: u64 = 2;

// ============================================================================
// COMPLIANCE SCHEDULER
// ============================================================================

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Retention enforcement interval (daily).
pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = DAY;

/// Erasure processing interval (every 6 hours).
pub const DEFAULT_ERASURE_INTERVAL_SECS: u64 = 6 * HOUR;

/// Integrity verification interval (weekly).
pub const DEFAULT_INTEGRITY_INTERVAL_SECS: u64 = 7 * DAY;

/// Audit log cleanup interval (30 days).
pub const DEFAULT_AUDIT_CLEANUP_INTERVAL_SECS: u64 = 30 * DAY;

/// Upper bound on a single job run (30 minutes).
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 30 * 60;

/// Audit entries older than this are purged (one year).
pub const DEFAULT_AUDIT_RETENTION_SECS: u64 = 365 * DAY;

// ============================================================================
// DATABASE
// ============================================================================

/// Default connection pool size.
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Default pool wait timeout in seconds.
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;
