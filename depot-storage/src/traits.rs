//! Collaborator traits.
//!
//! These are the seams to everything the control plane consumes but does not
//! own: the tenant store, the compliance policy backend, the key-value cache,
//! the database, and storage replicas. Implementations must be thread-safe;
//! none of them are expected to retry internally.

use async_trait::async_trait;
use depot_core::{DepotResult, JobKind, JobReport, RequestContext, TenantId, TenantInfo};
use std::time::Duration;

/// Authoritative tenant lookup.
///
/// Both lookups return only *active* tenants. An inactive tenant is
/// indistinguishable from a missing one.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_active_by_slug(&self, slug: &str) -> DepotResult<Option<TenantInfo>>;

    async fn find_active_by_id(&self, id: TenantId) -> DepotResult<Option<TenantInfo>>;
}

/// Compliance policy backend invoked by the scheduler.
///
/// Policy evaluation itself lives behind this trait.
#[async_trait]
pub trait ComplianceService: Send + Sync {
    async fn enforce_data_retention(&self, ctx: &RequestContext) -> DepotResult<JobReport>;

    async fn process_erasure_requests(&self, ctx: &RequestContext) -> DepotResult<JobReport>;

    async fn verify_data_integrity(&self, ctx: &RequestContext) -> DepotResult<JobReport>;

    async fn cleanup_audit_logs(
        &self,
        ctx: &RequestContext,
        retention: Duration,
    ) -> DepotResult<JobReport>;
}

/// Dispatch a job kind to its compliance entry point.
///
/// The match is total over [`JobKind`], so there is no unknown-job path.
pub async fn run_compliance_job(
    service: &dyn ComplianceService,
    kind: JobKind,
    ctx: &RequestContext,
    audit_retention: Duration,
) -> DepotResult<JobReport> {
    match kind {
        JobKind::Retention => service.enforce_data_retention(ctx).await,
        JobKind::Erasure => service.process_erasure_requests(ctx).await,
        JobKind::Integrity => service.verify_data_integrity(ctx).await,
        JobKind::AuditCleanup => service.cleanup_audit_logs(ctx, audit_retention).await,
    }
}

/// Generic key-value cache used for sessions, rate limiting and job queues.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn ping(&self) -> DepotResult<()>;

    async fn get(&self, key: &str) -> DepotResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> DepotResult<()>;

    async fn delete(&self, key: &str) -> DepotResult<bool>;

    /// Publish a message; returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, message: Vec<u8>) -> DepotResult<usize>;

    async fn enqueue_job(&self, queue: &str, payload: Vec<u8>) -> DepotResult<()>;

    /// Atomically remove and return the oldest job. Two concurrent callers
    /// never receive the same payload.
    async fn dequeue_job(&self, queue: &str) -> DepotResult<Option<Vec<u8>>>;
}

/// Database handle as seen by the health checker.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> DepotResult<()>;

    /// Standby replay lag. `Ok(None)` means no standby is configured.
    async fn replication_lag(&self) -> DepotResult<Option<Duration>>;
}

/// Liveness probe for one storage replica.
#[async_trait]
pub trait NodeProber: Send + Sync {
    async fn probe(&self, node_id: &str) -> Result<(), String>;
}
