//! depot storage - collaborators, envelope encryption and replica health.
//!
//! The traits in [`traits`] are the boundary to external systems. Everything
//! else in this crate is in-process state: the key cache, the encryption
//! service built on an abstract KMS, and the replication health tracker.

pub mod encryption;
pub mod memory;
pub mod replication;
pub mod traits;

pub use encryption::{
    kek_context, tmk_cache_key, DataKey, EncryptionService, KeyCache, KmsProvider, LocalKms,
    DEFAULT_KEY_SWEEP_INTERVAL, DEFAULT_KEY_TTL, INITIAL_KEY_VERSION, MAX_STREAM_BYTES,
    STREAM_CHUNK_SIZE,
};
pub use memory::{InMemoryCache, InMemoryTenantStore};
pub use replication::{
    quorum_status, ReplicationHealthTracker, ReplicationSnapshot, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_MIN_QUORUM,
};
pub use traits::{
    run_compliance_job, CacheClient, ComplianceService, DatabaseProbe, NodeProber, TenantStore,
};
