//! Short-lived in-memory cache of raw key material.
//!
//! Entries hold their bytes in [`Zeroizing`] buffers, so key material is
//! overwritten when an entry is deleted, cleared, evicted by the sweep or
//! replaced by a newer `set`. Zeroing is best-effort: the allocator may
//! already have copied the bytes elsewhere before they reached the cache.
//!
//! The cache is an optimization only. A miss must always fall through to the
//! KMS; nothing may depend on a hit.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use zeroize::Zeroizing;

/// Default time-to-live for cached keys.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(300);

/// Default interval of the background expiry sweep.
pub const DEFAULT_KEY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CachedKey {
    key: Zeroizing<Vec<u8>>,
    expires_at: Instant,
}

/// Concurrent key-id to key-bytes map with a fixed TTL.
pub struct KeyCache {
    entries: RwLock<HashMap<String, CachedKey>>,
    ttl: Duration,
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return a copy of the cached key, if present and unexpired.
    ///
    /// The copy is the caller's to zero; mutating it never touches the cache.
    pub fn get(&self, key_id: &str) -> Option<Zeroizing<Vec<u8>>> {
        let entries = self.read();
        let cached = entries.get(key_id)?;
        if Instant::now() >= cached.expires_at {
            return None;
        }
        Some(Zeroizing::new(cached.key.to_vec()))
    }

    /// Store a copy of `key` under `key_id`, replacing (and zeroing) any
    /// previous entry.
    pub fn set(&self, key_id: impl Into<String>, key: &[u8]) {
        let entry = CachedKey {
            key: Zeroizing::new(key.to_vec()),
            expires_at: Instant::now() + self.ttl,
        };
        self.write().insert(key_id.into(), entry);
    }

    /// Zero and remove one entry. Returns whether it existed.
    pub fn delete(&self, key_id: &str) -> bool {
        self.write().remove(key_id).is_some()
    }

    /// Zero and remove every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Zero and remove expired entries. Returns the number evicted.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, cached| cached.expires_at > now);
        before - entries.len()
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `interval` until
    /// `shutdown` flips to `true`.
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
                            tracing::debug!("Key cache sweeper shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.cleanup_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Evicted expired keys");
                        }
                    }
                }
            }
        })
    }

    // A panicking writer cannot leave a half-inserted entry behind, so the
    // map is still consistent after poisoning.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CachedKey>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedKey>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_TTL)
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
