//! In-memory collaborators for development and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use depot_core::{DepotResult, StorageError, TenantId, TenantInfo};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::traits::{CacheClient, TenantStore};

// ============================================================================
// TENANT STORE
// ============================================================================

/// Tenant store backed by a map keyed on tenant id.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<TenantId, TenantInfo>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant.
    pub fn upsert(&self, tenant: TenantInfo) -> DepotResult<()> {
        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        tenants.insert(tenant.id, tenant);
        Ok(())
    }

    pub fn remove(&self, id: TenantId) -> DepotResult<Option<TenantInfo>> {
        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(tenants.remove(&id))
    }

    pub fn set_active(&self, id: TenantId, active: bool) -> DepotResult<bool> {
        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(match tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.is_active = active;
                true
            }
            None => false,
        })
    }

    pub fn len(&self) -> usize {
        self.tenants.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find_active_by_slug(&self, slug: &str) -> DepotResult<Option<TenantInfo>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(tenants
            .values()
            .find(|t| t.is_active && t.slug == slug)
            .cloned())
    }

    async fn find_active_by_id(&self, id: TenantId) -> DepotResult<Option<TenantInfo>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(tenants.get(&id).filter(|t| t.is_active).cloned())
    }
}

// ============================================================================
// KEY-VALUE CACHE
// ============================================================================

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    channels: HashMap<String, broadcast::Sender<Vec<u8>>>,
}

/// Process-local [`CacheClient`].
///
/// Queue pops happen under the single write lock, so a job is handed to
/// exactly one caller.
#[derive(Default)]
pub struct InMemoryCache {
    state: RwLock<CacheState>,
}

/// Buffered messages per pub/sub channel.
const CHANNEL_CAPACITY: usize = 256;

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `channel`, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> DepotResult<broadcast::Receiver<Vec<u8>>> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let sender = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.state
            .read()
            .map(|s| s.queues.get(queue).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Stored key-value entries, expired or not.
    pub fn entry_count(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Drop expired key-value entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        before - state.entries.len()
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `interval` until
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Cache sweeper shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.cleanup_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

fn poisoned() -> StorageError {
    StorageError::Cache {
        reason: "cache lock poisoned".to_string(),
    }
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn ping(&self) -> DepotResult<()> {
        let _state = self.state.read().map_err(|_| poisoned())?;
        Ok(())
    }

    async fn get(&self, key: &str) -> DepotResult<Option<Vec<u8>>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let now = Instant::now();
        Ok(state
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> DepotResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        state
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> DepotResult<bool> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let now = Instant::now();
        Ok(state
            .entries
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn publish(&self, channel: &str, message: Vec<u8>) -> DepotResult<usize> {
        let state = self.state.read().map_err(|_| poisoned())?;
        // A send error only means nobody is listening.
        Ok(state
            .channels
            .get(channel)
            .and_then(|tx| tx.send(message).ok())
            .unwrap_or(0))
    }

    async fn enqueue_job(&self, queue: &str, payload: Vec<u8>) -> DepotResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn dequeue_job(&self, queue: &str) -> DepotResult<Option<Vec<u8>>> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        Ok(state.queues.get_mut(queue).and_then(VecDeque::pop_front))
    }
}
