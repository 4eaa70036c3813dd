//! Error types for depot operations

use thiserror::Error;

/// Tenant resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantError {
    /// No active tenant matches. Inactive tenants land here too.
    #[error("Tenant not found: {key}")]
    NotFound { key: String },

    /// The backing store could not answer.
    #[error("Tenant store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// A default tenant was requested but none is configured.
    #[error("No default tenant configured")]
    DefaultNotConfigured,
}

/// Missing tenant context on a unit of work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Tenant context missing: {field} requested but no tenant is attached")]
    MissingTenant { field: &'static str },
}

/// KMS capability errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KmsError {
    /// Transport or service failure. Reported, never retried here.
    #[error("KMS unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("KMS key not found: {key_id}")]
    KeyNotFound { key_id: String },

    /// The KMS refused to unwrap (wrong key, corrupted input).
    #[error("KMS rejected ciphertext")]
    InvalidCiphertext,

    #[error("KMS internal error: {reason}")]
    Internal { reason: String },
}

/// Envelope-encryption errors.
///
/// `DecryptionFailed` is deliberately uninformative: authentication failure,
/// tenant mismatch and corrupted input all collapse into it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to wrap data key: {0}")]
    KeyWrap(KmsError),

    #[error("Failed to unwrap data key: {0}")]
    KeyUnwrap(KmsError),

    #[error("Cipher setup failed: {reason}")]
    CipherSetup { reason: String },

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("Encrypted data has no tenant id")]
    MissingTenant,

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Invalid encrypted envelope: {reason}")]
    InvalidEnvelope { reason: String },

    #[error("Stream error: {reason}")]
    Stream { reason: String },

    #[error("Metadata field '{field}': {source}")]
    MetadataField {
        field: String,
        #[source]
        source: Box<CryptoError>,
    },
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Compliance scheduler lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Compliance scheduler is already running")]
    AlreadyRunning,

    #[error("Compliance scheduler is not running")]
    NotRunning,
}

/// Failures of external stores (database, cache, compliance backend).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Cache error: {reason}")]
    Cache { reason: String },

    #[error("Operation '{operation}' timed out")]
    Timeout { operation: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Master error type for all depot errors.
#[derive(Debug, Clone, Error)]
pub enum DepotError {
    #[error("Tenant error: {0}")]
    Tenant(#[from] TenantError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("KMS error: {0}")]
    Kms(#[from] KmsError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for depot operations.
pub type DepotResult<T> = Result<T, DepotError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decryption_failed_message_is_fixed() {
        assert_eq!(CryptoError::DecryptionFailed.to_string(), "decryption failed");
    }

    #[test]
    fn test_metadata_field_error_names_field() {
        let err = CryptoError::MetadataField {
            field: "license".to_string(),
            source: Box::new(CryptoError::KeyWrap(KmsError::Unavailable {
                reason: "timeout".to_string(),
            })),
        };
        let msg = err.to_string();
        assert!(msg.contains("license"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn test_depot_error_from_conversions() {
        let err: DepotError = TenantError::NotFound { key: "alpha".into() }.into();
        assert!(matches!(err, DepotError::Tenant(TenantError::NotFound { .. })));

        let err: DepotError = SchedulerError::NotRunning.into();
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn test_context_error_names_field() {
        let err = ContextError::MissingTenant { field: "tenant_slug" };
        assert!(err.to_string().contains("tenant_slug"));
    }
}
