//! Error Types for the depot API
//!
//! This module defines error handling for the HTTP boundary:
//! - ApiError struct for structured error responses
//! - ErrorCode enum with stable snake_case codes
//! - IntoResponse implementation for Axum HTTP responses
//!
//! Domain errors from `depot-core` convert into `ApiError` here, and nowhere
//! else, so the mapping from failure to status code lives in one place.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use depot_core::{
    ConfigError, ContextError, CryptoError, DepotError, KmsError, SchedulerError, StorageError,
    TenantError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// The serialized form is part of the public contract; operators and clients
/// match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ========================================================================
    // Tenant Errors
    // ========================================================================
    /// No tenant signal on a tenant-scoped route and no fallback allowed
    TenantRequired,

    /// Slug or id does not match an active tenant
    TenantNotFound,

    /// Tenant store could not answer
    TenantResolutionFailed,

    /// Handler reached without tenant context
    MissingTenantContext,

    // ========================================================================
    // Authentication Errors (401, 403)
    // ========================================================================
    /// Operator credential missing or wrong
    Unauthorized,

    /// Operator routes are disabled on this deployment
    Forbidden,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Compliance job name is not recognized
    JobNotFound,

    // ========================================================================
    // Crypto Errors
    // ========================================================================
    /// Ciphertext could not be opened. Deliberately uninformative.
    DecryptionFailed,

    /// Sealing failed
    EncryptionFailed,

    /// KMS could not be reached
    KmsUnavailable,

    // ========================================================================
    // Scheduler Errors (409)
    // ========================================================================
    SchedulerAlreadyRunning,

    SchedulerNotRunning,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Configuration is invalid
    ConfigurationError,

    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Operation timed out
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::TenantRequired
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidFormat
            | ErrorCode::DecryptionFailed => StatusCode::BAD_REQUEST,

            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::TenantNotFound | ErrorCode::JobNotFound => StatusCode::NOT_FOUND,

            ErrorCode::SchedulerAlreadyRunning | ErrorCode::SchedulerNotRunning => {
                StatusCode::CONFLICT
            }

            ErrorCode::KmsUnavailable | ErrorCode::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::TenantResolutionFailed
            | ErrorCode::MissingTenantContext
            | ErrorCode::EncryptionFailed
            | ErrorCode::ConfigurationError
            | ErrorCode::InternalError
            | ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::TenantRequired => "Tenant identification is required",
            ErrorCode::TenantNotFound => "Tenant not found",
            ErrorCode::TenantResolutionFailed => "Failed to resolve tenant",
            ErrorCode::MissingTenantContext => "Tenant context missing",
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::JobNotFound => "Compliance job not found",
            ErrorCode::DecryptionFailed => "decryption failed",
            ErrorCode::EncryptionFailed => "Encryption failed",
            ErrorCode::KmsUnavailable => "Key management service unavailable",
            ErrorCode::SchedulerAlreadyRunning => "Compliance scheduler is already running",
            ErrorCode::SchedulerNotRunning => "Compliance scheduler is not running",
            ErrorCode::ConfigurationError => "Invalid configuration",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Timeout => "Operation timed out",
        }
    }

    /// The wire form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TenantRequired => "tenant_required",
            ErrorCode::TenantNotFound => "tenant_not_found",
            ErrorCode::TenantResolutionFailed => "tenant_resolution_failed",
            ErrorCode::MissingTenantContext => "missing_tenant_context",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::InvalidFormat => "invalid_format",
            ErrorCode::JobNotFound => "job_not_found",
            ErrorCode::DecryptionFailed => "decryption_failed",
            ErrorCode::EncryptionFailed => "encryption_failed",
            ErrorCode::KmsUnavailable => "kms_unavailable",
            ErrorCode::SchedulerAlreadyRunning => "scheduler_already_running",
            ErrorCode::SchedulerNotRunning => "scheduler_not_running",
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn tenant_required() -> Self {
        Self::from_code(ErrorCode::TenantRequired)
    }

    pub fn tenant_not_found(key: impl fmt::Display) -> Self {
        Self::new(ErrorCode::TenantNotFound, format!("Tenant {} not found", key))
    }

    pub fn tenant_resolution_failed() -> Self {
        Self::from_code(ErrorCode::TenantResolutionFailed)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn job_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::JobNotFound,
            format!("Compliance job '{}' not found", name),
        )
    }

    /// The only decryption error clients ever see.
    pub fn decryption_failed() -> Self {
        Self::from_code(ErrorCode::DecryptionFailed)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound { key } => ApiError::tenant_not_found(key),
            TenantError::StoreUnavailable { reason } => {
                tracing::error!(error = %reason, "Tenant store unavailable");
                ApiError::tenant_resolution_failed()
            }
            TenantError::DefaultNotConfigured => ApiError::tenant_required(),
        }
    }
}

fn kms_error(err: KmsError) -> ApiError {
    match err {
        KmsError::Unavailable { reason } => {
            tracing::error!(error = %reason, "KMS unavailable");
            ApiError::from_code(ErrorCode::KmsUnavailable)
        }
        other => {
            tracing::error!(error = %other, "KMS error");
            ApiError::from_code(ErrorCode::EncryptionFailed)
        }
    }
}

impl From<KmsError> for ApiError {
    fn from(err: KmsError) -> Self {
        kms_error(err)
    }
}

impl From<ContextError> for ApiError {
    fn from(err: ContextError) -> Self {
        tracing::error!(error = %err, "Handler reached without tenant context");
        ApiError::from_code(ErrorCode::MissingTenantContext)
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyWrap(kms) | CryptoError::KeyUnwrap(kms) => kms_error(kms),
            CryptoError::DecryptionFailed
            | CryptoError::MissingTenant
            | CryptoError::InvalidEnvelope { .. } => {
                tracing::debug!(error = %err, "Decryption rejected");
                ApiError::decryption_failed()
            }
            CryptoError::MetadataField { field, source } => {
                ApiError::from(*source).with_details(serde_json::json!({ "field": field }))
            }
            other => {
                tracing::error!(error = %other, "Encryption error");
                ApiError::from_code(ErrorCode::EncryptionFailed)
            }
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::AlreadyRunning => ApiError::from_code(ErrorCode::SchedulerAlreadyRunning),
            SchedulerError::NotRunning => ApiError::from_code(ErrorCode::SchedulerNotRunning),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "Storage error");
        match err {
            StorageError::Database { .. } => ApiError::database_error("Database operation failed"),
            StorageError::Cache { .. } => ApiError::service_unavailable("Cache unavailable"),
            StorageError::Timeout { operation } => ApiError::timeout(&operation),
            StorageError::LockPoisoned => ApiError::internal_error("Internal state unavailable"),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::new(ErrorCode::ConfigurationError, err.to_string())
    }
}

impl From<DepotError> for ApiError {
    fn from(err: DepotError) -> Self {
        match err {
            DepotError::Tenant(e) => e.into(),
            DepotError::Context(e) => e.into(),
            DepotError::Kms(e) => e.into(),
            DepotError::Crypto(e) => e.into(),
            DepotError::Config(e) => e.into(),
            DepotError::Scheduler(e) => e.into(),
            DepotError::Storage(e) => e.into(),
        }
    }
}

// ============================================================================
// CONVERSIONS FROM STANDARD ERRORS
// ============================================================================

/// Convert from uuid::Error to ApiError.
impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", &format!("valid UUID: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_codes_map_to_documented_statuses() {
        assert_eq!(ErrorCode::TenantRequired.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::TenantNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::TenantResolutionFailed.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_codes_serialize_snake_case() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&ApiError::tenant_required())?;
        assert!(json.contains("\"tenant_required\""));

        let json = serde_json::to_string(&ErrorCode::TenantResolutionFailed)?;
        assert_eq!(json, "\"tenant_resolution_failed\"");
        Ok(())
    }

    #[test]
    fn test_as_str_matches_serde() -> Result<(), serde_json::Error> {
        for code in [
            ErrorCode::TenantNotFound,
            ErrorCode::DecryptionFailed,
            ErrorCode::SchedulerNotRunning,
            ErrorCode::Unauthorized,
            ErrorCode::Forbidden,
        ] {
            assert_eq!(serde_json::to_string(&code)?, format!("\"{}\"", code));
        }
        Ok(())
    }

    #[test]
    fn test_tenant_error_conversion() {
        let err: ApiError = TenantError::NotFound { key: "alpha".into() }.into();
        assert_eq!(err.code, ErrorCode::TenantNotFound);
        assert!(err.message.contains("alpha"));

        let err: ApiError = TenantError::StoreUnavailable {
            reason: "connection refused".into(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::TenantResolutionFailed);
        assert!(!err.message.contains("connection refused"));
    }

    #[test]
    fn test_decryption_errors_are_uniform() {
        let variants = [
            CryptoError::DecryptionFailed,
            CryptoError::MissingTenant,
            CryptoError::InvalidEnvelope {
                reason: "nonce".into(),
            },
        ];
        let errors: Vec<ApiError> = variants.into_iter().map(ApiError::from).collect();
        for err in &errors {
            assert_eq!(err, &errors[0]);
        }
        assert_eq!(errors[0].message, "decryption failed");
    }

    #[test]
    fn test_kms_outage_is_not_a_decryption_failure() {
        let err: ApiError = CryptoError::KeyUnwrap(KmsError::Unavailable {
            reason: "timeout".into(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::KmsUnavailable);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_metadata_field_is_named_in_details() {
        let err: ApiError = CryptoError::MetadataField {
            field: "license".into(),
            source: Box::new(CryptoError::DecryptionFailed),
        }
        .into();
        assert_eq!(err.code, ErrorCode::DecryptionFailed);
        assert_eq!(err.details, Some(serde_json::json!({ "field": "license" })));
    }

    #[test]
    fn test_depot_error_conversion() {
        let err: ApiError = DepotError::from(SchedulerError::NotRunning).into();
        assert_eq!(err.code, ErrorCode::SchedulerNotRunning);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err: ApiError = DepotError::from(StorageError::Timeout {
            operation: "retention".into(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::database_error("Connection failed");
        let display = format!("{}", err);
        assert!(display.contains("database_error"));
        assert!(display.contains("Connection failed"));
    }
}
