//! depot core - data types for the artifact repository control plane.
//!
//! Pure data structures and the error taxonomy. Every other crate depends on
//! this one; nothing here performs I/O.

mod compliance;
mod context;
mod envelope;
mod error;
mod health;
mod identity;
mod tenant;

pub use compliance::{JobKind, JobReport};
pub use context::{RequestContext, TenantContext, WorkOrigin};
pub use envelope::{Algorithm, EncryptedData, GCM_TAG_SIZE, KEY_SIZE, NONCE_SIZE};
pub use error::{
    ConfigError, ContextError, CryptoError, DepotError, DepotResult, KmsError, SchedulerError,
    StorageError, TenantError,
};
pub use health::{HealthStatus, NodeHealth, NodeState};
pub use identity::{NodeId, TenantId, Timestamp};
pub use tenant::{is_valid_slug, TenantInfo, TenantPlan, MAX_SLUG_LEN};
