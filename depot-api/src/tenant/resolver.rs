//! Tenant resolution with a TTL cache in front of the tenant store.
//!
//! The cache is keyed by slug. Lookups by id scan it linearly, which is fine
//! for the handful of tenants a process sees within one TTL window. Both
//! lookups share the same entries, so TTL and invalidation apply equally.
//!
//! Store calls happen without holding the cache lock. Two concurrent misses
//! for the same slug may both hit the store; the later insert wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use depot_core::{TenantError, TenantId, TenantInfo};
use depot_storage::TenantStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::telemetry::metrics;

struct CachedTenant {
    info: TenantInfo,
    expires_at: Instant,
}

impl CachedTenant {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Resolves slugs and ids to active tenants.
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
    cache: RwLock<HashMap<String, CachedTenant>>,
    ttl: Duration,
    default_slug: Option<String>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn TenantStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
            default_slug: None,
        }
    }

    /// Configure the fallback tenant returned by
    /// [`default_tenant`](Self::default_tenant).
    pub fn with_default_tenant(mut self, slug: impl Into<String>) -> Self {
        self.default_slug = Some(slug.into());
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve an active tenant by slug, consulting the cache first.
    pub async fn resolve_by_slug(&self, slug: &str) -> Result<TenantInfo, TenantError> {
        if let Some(info) = self.cached_by_slug(slug) {
            record_cache(true);
            return Ok(info);
        }
        record_cache(false);

        let found = self
            .store
            .find_active_by_slug(slug)
            .await
            .map_err(store_unavailable)?;
        self.admit(found, slug)
    }

    /// Resolve an active tenant by id, consulting the cache first.
    pub async fn resolve_by_id(&self, id: TenantId) -> Result<TenantInfo, TenantError> {
        if let Some(info) = self.cached_by_id(id) {
            record_cache(true);
            return Ok(info);
        }
        record_cache(false);

        let found = self
            .store
            .find_active_by_id(id)
            .await
            .map_err(store_unavailable)?;
        self.admit(found, &id.to_string())
    }

    /// The configured fallback tenant.
    pub async fn default_tenant(&self) -> Result<TenantInfo, TenantError> {
        match self.default_slug.as_deref() {
            Some(slug) => self.resolve_by_slug(slug).await,
            None => Err(TenantError::DefaultNotConfigured),
        }
    }

    /// Drop the cached entry for `slug`. Returns whether one existed.
    pub fn invalidate(&self, slug: &str) -> bool {
        let removed = self.write().remove(slug).is_some();
        if removed {
            tracing::debug!(tenant_slug = %slug, "Tenant cache entry invalidated");
        }
        removed
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.write().clear();
        tracing::debug!("Tenant cache cleared");
    }

    /// Remove expired entries. Returns the number evicted.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.write();
        let before = cache.len();
        cache.retain(|_, cached| cached.is_live(now));
        before - cache.len()
    }

    /// Entries currently held, expired or not.
    pub fn cached_len(&self) -> usize {
        self.read().len()
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `interval` until
    /// `shutdown` flips to `true`.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Tenant cache sweeper shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let evicted = resolver.cleanup_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Evicted expired tenants");
                        }
                    }
                }
            }
        })
    }

    fn cached_by_slug(&self, slug: &str) -> Option<TenantInfo> {
        let now = Instant::now();
        self.read()
            .get(slug)
            .filter(|cached| cached.is_live(now))
            .map(|cached| cached.info.clone())
    }

    fn cached_by_id(&self, id: TenantId) -> Option<TenantInfo> {
        let now = Instant::now();
        self.read()
            .values()
            .find(|cached| cached.info.id == id && cached.is_live(now))
            .map(|cached| cached.info.clone())
    }

    /// Cache and return a store result. Inactive rows count as missing even
    /// if the store let one through.
    fn admit(&self, found: Option<TenantInfo>, key: &str) -> Result<TenantInfo, TenantError> {
        let info = match found {
            Some(info) if info.is_active => info,
            _ => {
                return Err(TenantError::NotFound {
                    key: key.to_string(),
                })
            }
        };

        self.write().insert(
            info.slug.clone(),
            CachedTenant {
                info: info.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(info)
    }

    // Entries are replaced whole, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CachedTenant>> {
        self.cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedTenant>> {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantResolver")
            .field("cached", &self.cached_len())
            .field("ttl", &self.ttl)
            .field("default_slug", &self.default_slug)
            .finish()
    }
}

fn store_unavailable(err: depot_core::DepotError) -> TenantError {
    tracing::error!(error = %err, "Tenant store lookup failed");
    TenantError::StoreUnavailable {
        reason: err.to_string(),
    }
}

fn record_cache(hit: bool) {
    if let Some(m) = metrics() {
        m.record_tenant_cache(hit);
    }
}
