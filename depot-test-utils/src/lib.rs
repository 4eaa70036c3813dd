//! depot Test Utilities
//!
//! Shared test infrastructure for the depot workspace:
//! - Scripted collaborators whose failures and delays tests control
//! - Proptest generators for slugs, payloads and health states
//! - Fixtures for tenants and encryption services

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use zeroize::Zeroizing;

// Re-export core types for convenience
pub use depot_core::{
    DepotError, DepotResult, HealthStatus, JobKind, JobReport, KmsError, RequestContext,
    StorageError, TenantContext, TenantId, TenantInfo, TenantPlan, WorkOrigin,
};
pub use depot_storage::{
    CacheClient, ComplianceService, DataKey, DatabaseProbe, InMemoryCache, InMemoryTenantStore,
    KmsProvider, LocalKms, NodeProber, TenantStore,
};

pub use generators::{health_status_strategy, plaintext_strategy, slug_strategy};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ============================================================================
// TENANT STORE
// ============================================================================

/// [`InMemoryTenantStore`] that counts lookups and can be switched off.
#[derive(Debug, Default)]
pub struct CountingTenantStore {
    inner: InMemoryTenantStore,
    slug_lookups: AtomicUsize,
    id_lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl CountingTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant: TenantInfo) {
        // Only fails on a poisoned lock, which a test would see anyway.
        let _ = self.inner.upsert(tenant);
    }

    pub fn set_active(&self, id: TenantId, active: bool) -> bool {
        self.inner.set_active(id, active).unwrap_or(false)
    }

    /// Make every lookup fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn slug_lookups(&self) -> usize {
        self.slug_lookups.load(Ordering::SeqCst)
    }

    pub fn id_lookups(&self) -> usize {
        self.id_lookups.load(Ordering::SeqCst)
    }

    pub fn total_lookups(&self) -> usize {
        self.slug_lookups() + self.id_lookups()
    }

    fn check_available(&self) -> DepotResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Database {
                reason: "connection refused".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for CountingTenantStore {
    async fn find_active_by_slug(&self, slug: &str) -> DepotResult<Option<TenantInfo>> {
        self.slug_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.find_active_by_slug(slug).await
    }

    async fn find_active_by_id(&self, id: TenantId) -> DepotResult<Option<TenantInfo>> {
        self.id_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.find_active_by_id(id).await
    }
}

// ============================================================================
// KMS
// ============================================================================

/// [`LocalKms`] with a kill switch and call counters.
pub struct FlakyKms {
    inner: LocalKms,
    unavailable: AtomicBool,
    data_keys: AtomicUsize,
    unwraps: AtomicUsize,
}

impl FlakyKms {
    /// A KMS holding one random master key under `key_id`.
    pub fn new(key_id: &str) -> Self {
        let inner = LocalKms::new();
        inner.create_key(key_id);
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            data_keys: AtomicUsize::new(0),
            unwraps: AtomicUsize::new(0),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn data_keys_generated(&self) -> usize {
        self.data_keys.load(Ordering::SeqCst)
    }

    pub fn unwrap_calls(&self) -> usize {
        self.unwraps.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), KmsError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KmsError::Unavailable {
                reason: "injected outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KmsProvider for FlakyKms {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.check_available()?;
        self.inner.encrypt(key_id, plaintext).await
    }

    async fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.decrypt(key_id, ciphertext).await
    }

    async fn generate_data_key(&self, key_id: &str) -> Result<DataKey, KmsError> {
        self.data_keys.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.generate_data_key(key_id).await
    }
}

// ============================================================================
// COMPLIANCE SERVICE
// ============================================================================

#[derive(Debug, Default)]
struct ComplianceScript {
    calls: HashMap<JobKind, usize>,
    failing: HashSet<JobKind>,
    hangs: HashMap<JobKind, Duration>,
    origins: Vec<WorkOrigin>,
    last_audit_retention: Option<Duration>,
}

/// Compliance backend that records every call.
///
/// A failing job returns a database error; a hanging job sleeps on the
/// tokio clock before succeeding, so paused-time tests can drive it.
#[derive(Debug, Default)]
pub struct RecordingComplianceService {
    script: Mutex<ComplianceScript>,
}

impl RecordingComplianceService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, kind: JobKind, failing: bool) {
        let mut script = lock(&self.script);
        if failing {
            script.failing.insert(kind);
        } else {
            script.failing.remove(&kind);
        }
    }

    pub fn hang(&self, kind: JobKind, duration: Duration) {
        lock(&self.script).hangs.insert(kind, duration);
    }

    pub fn calls(&self, kind: JobKind) -> usize {
        lock(&self.script).calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn origins(&self) -> Vec<WorkOrigin> {
        lock(&self.script).origins.clone()
    }

    pub fn last_audit_retention(&self) -> Option<Duration> {
        lock(&self.script).last_audit_retention
    }

    async fn run(&self, kind: JobKind, ctx: &RequestContext) -> DepotResult<JobReport> {
        let (hang, failing, n) = {
            let mut script = lock(&self.script);
            let n = {
                let count = script.calls.entry(kind).or_insert(0);
                *count += 1;
                *count
            };
            script.origins.push(ctx.origin());
            (
                script.hangs.get(&kind).copied(),
                script.failing.contains(&kind),
                n,
            )
        };

        if let Some(duration) = hang {
            tokio::time::sleep(duration).await;
        }
        if failing {
            return Err(StorageError::Database {
                reason: format!("{} pass failed", kind),
            }
            .into());
        }
        Ok(JobReport::affected(n as u64))
    }
}

#[async_trait]
impl ComplianceService for RecordingComplianceService {
    async fn enforce_data_retention(&self, ctx: &RequestContext) -> DepotResult<JobReport> {
        self.run(JobKind::Retention, ctx).await
    }

    async fn process_erasure_requests(&self, ctx: &RequestContext) -> DepotResult<JobReport> {
        self.run(JobKind::Erasure, ctx).await
    }

    async fn verify_data_integrity(&self, ctx: &RequestContext) -> DepotResult<JobReport> {
        self.run(JobKind::Integrity, ctx).await
    }

    async fn cleanup_audit_logs(
        &self,
        ctx: &RequestContext,
        retention: Duration,
    ) -> DepotResult<JobReport> {
        lock(&self.script).last_audit_retention = Some(retention);
        self.run(JobKind::AuditCleanup, ctx).await
    }
}

// ============================================================================
// HEALTH PROBES
// ============================================================================

/// Node prober answering from a fixed set of down nodes.
#[derive(Debug, Default)]
pub struct StaticNodeProber {
    down: Mutex<HashSet<String>>,
    probes: AtomicUsize,
}

impl StaticNodeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, node_id: &str, down: bool) {
        let mut nodes = lock(&self.down);
        if down {
            nodes.insert(node_id.to_string());
        } else {
            nodes.remove(node_id);
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeProber for StaticNodeProber {
    async fn probe(&self, node_id: &str) -> Result<(), String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if lock(&self.down).contains(node_id) {
            Err(format!("{} refused connection", node_id))
        } else {
            Ok(())
        }
    }
}

/// Database probe with scripted ping failures, lag and latency.
#[derive(Debug, Default)]
pub struct ScriptedDatabaseProbe {
    ping_fails: AtomicBool,
    lag: Mutex<Option<Duration>>,
    delay_ms: AtomicU64,
    pings: AtomicUsize,
}

impl ScriptedDatabaseProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_ping(&self, fail: bool) {
        self.ping_fails.store(fail, Ordering::SeqCst);
    }

    /// `None` reports a primary without a standby.
    pub fn set_lag(&self, lag: Option<Duration>) {
        *lock(&self.lag) = lag;
    }

    /// Delay every call by `delay` on the tokio clock.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl DatabaseProbe for ScriptedDatabaseProbe {
    async fn ping(&self) -> DepotResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(StorageError::Database {
                reason: "connection refused".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn replication_lag(&self) -> DepotResult<Option<Duration>> {
        self.wait().await;
        Ok(*lock(&self.lag))
    }
}

/// [`InMemoryCache`] whose ping can be made to fail.
#[derive(Default)]
pub struct ScriptedCache {
    inner: InMemoryCache,
    ping_fails: AtomicBool,
}

impl ScriptedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_ping(&self, fail: bool) {
        self.ping_fails.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheClient for ScriptedCache {
    async fn ping(&self) -> DepotResult<()> {
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(StorageError::Cache {
                reason: "connection reset".to_string(),
            }
            .into());
        }
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> DepotResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> DepotResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> DepotResult<bool> {
        self.inner.delete(key).await
    }

    async fn publish(&self, channel: &str, message: Vec<u8>) -> DepotResult<usize> {
        self.inner.publish(channel, message).await
    }

    async fn enqueue_job(&self, queue: &str, payload: Vec<u8>) -> DepotResult<()> {
        self.inner.enqueue_job(queue, payload).await
    }

    async fn dequeue_job(&self, queue: &str) -> DepotResult<Option<Vec<u8>>> {
        self.inner.dequeue_job(queue).await
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for depot inputs.

    use super::*;
    use proptest::prelude::*;

    /// A valid tenant slug: lowercase alphanumerics and inner hyphens.
    pub fn slug_strategy() -> impl Strategy<Value = String> {
        "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?"
    }

    /// Arbitrary artifact bytes, empty included.
    pub fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..4096)
    }

    pub fn health_status_strategy() -> impl Strategy<Value = HealthStatus> {
        prop_oneof![
            Just(HealthStatus::Healthy),
            Just(HealthStatus::Degraded),
            Just(HealthStatus::Unhealthy),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made tenants and services.

    use super::*;
    use depot_storage::{EncryptionService, KeyCache, DEFAULT_KEY_TTL};

    /// An active tenant on the free plan with a fresh id.
    pub fn tenant(slug: &str) -> TenantInfo {
        TenantInfo::new(TenantId::now_v7(), slug, slug.to_uppercase())
    }

    pub fn tenant_context(slug: &str) -> TenantContext {
        TenantContext::from(&tenant(slug))
    }

    /// A store preloaded with one active tenant per slug.
    pub fn store_with(slugs: &[&str]) -> Arc<CountingTenantStore> {
        let store = Arc::new(CountingTenantStore::new());
        for slug in slugs {
            store.upsert(tenant(slug));
        }
        store
    }

    /// An encryption service over `kms` with a default-TTL key cache.
    pub fn encryption_service(kms: Arc<dyn KmsProvider>) -> EncryptionService {
        EncryptionService::new(kms, Arc::new(KeyCache::new(DEFAULT_KEY_TTL)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::is_valid_slug;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_counting_store_outage() {
        let store = fixtures::store_with(&["alpha"]);
        assert!(store.find_active_by_slug("alpha").await.expect("lookup").is_some());

        store.set_unavailable(true);
        assert!(store.find_active_by_slug("alpha").await.is_err());
        assert_eq!(store.slug_lookups(), 2);
        assert_eq!(store.total_lookups(), 2);
    }

    #[tokio::test]
    async fn test_flaky_kms_outage() {
        let kms = FlakyKms::new("kek");
        assert!(kms.generate_data_key("kek").await.is_ok());
        kms.set_unavailable(true);
        assert!(matches!(
            kms.generate_data_key("kek").await,
            Err(KmsError::Unavailable { .. })
        ));
        assert_eq!(kms.data_keys_generated(), 2);
    }

    #[tokio::test]
    async fn test_static_prober() {
        let prober = StaticNodeProber::new();
        prober.set_down("b", true);
        assert!(prober.probe("a").await.is_ok());
        assert!(prober.probe("b").await.is_err());
        assert_eq!(prober.probe_count(), 2);
    }

    proptest! {
        #[test]
        fn prop_slug_strategy_is_valid(slug in slug_strategy()) {
            prop_assert!(is_valid_slug(&slug));
        }
    }
}
