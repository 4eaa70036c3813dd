//! Artifact sealing routes.
//!
//! Thin HTTP wrappers over [`EncryptionService`] so operators and clients
//! can seal and open artifacts and metadata under the tenant resolved for the
//! request. Bytes travel as standard base64.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use depot_core::{CryptoError, EncryptedData};
use depot_storage::EncryptionService;
use serde::{Deserialize, Serialize};

use crate::config::EncryptionConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::TenantExtractor;
use crate::state::AppState;
use crate::telemetry::metrics;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPayload {
    /// Base64 plaintext.
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub fields: HashMap<String, String>,
}

// ============================================================================
// HELPERS
// ============================================================================

fn kek_key_id(config: &EncryptionConfig) -> ApiResult<&str> {
    config
        .kms_key_id
        .as_deref()
        .ok_or_else(|| ApiError::internal_error("KMS key id not configured"))
}

fn record<T>(operation: &str, result: &Result<T, CryptoError>) {
    if let Some(m) = metrics() {
        m.record_crypto(operation, result.is_ok());
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/artifacts/seal
pub async fn seal_artifact(
    State(service): State<Arc<EncryptionService>>,
    State(config): State<Arc<EncryptionConfig>>,
    TenantExtractor(ctx): TenantExtractor,
    Json(payload): Json<ArtifactPayload>,
) -> ApiResult<Json<EncryptedData>> {
    let tenant = ctx.tenant()?;
    let plaintext = STANDARD
        .decode(payload.data.as_bytes())
        .map_err(|_| ApiError::invalid_format("data", "standard base64"))?;

    let result = service
        .encrypt_artifact(tenant, &plaintext, kek_key_id(&config)?)
        .await;
    record("encrypt_artifact", &result);
    Ok(Json(result?))
}

/// POST /api/v1/artifacts/open
pub async fn open_artifact(
    State(service): State<Arc<EncryptionService>>,
    State(config): State<Arc<EncryptionConfig>>,
    TenantExtractor(ctx): TenantExtractor,
    Json(sealed): Json<EncryptedData>,
) -> ApiResult<Json<ArtifactPayload>> {
    let tenant = ctx.tenant()?;
    let result = service
        .decrypt_artifact(tenant, &sealed, kek_key_id(&config)?)
        .await;
    record("decrypt_artifact", &result);
    Ok(Json(ArtifactPayload {
        data: STANDARD.encode(result?),
    }))
}

/// POST /api/v1/artifacts/metadata/seal
pub async fn seal_metadata(
    State(service): State<Arc<EncryptionService>>,
    State(config): State<Arc<EncryptionConfig>>,
    TenantExtractor(ctx): TenantExtractor,
    Json(payload): Json<MetadataPayload>,
) -> ApiResult<Json<MetadataPayload>> {
    let tenant = ctx.tenant()?;
    let result = service
        .encrypt_metadata(tenant, &payload.fields, kek_key_id(&config)?)
        .await;
    record("encrypt_metadata", &result);
    Ok(Json(MetadataPayload { fields: result? }))
}

/// POST /api/v1/artifacts/metadata/open
pub async fn open_metadata(
    State(service): State<Arc<EncryptionService>>,
    State(config): State<Arc<EncryptionConfig>>,
    TenantExtractor(ctx): TenantExtractor,
    Json(payload): Json<MetadataPayload>,
) -> ApiResult<Json<MetadataPayload>> {
    let tenant = ctx.tenant()?;
    let result = service
        .decrypt_metadata(tenant, &payload.fields, kek_key_id(&config)?)
        .await;
    record("decrypt_metadata", &result);
    Ok(Json(MetadataPayload { fields: result? }))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/seal", post(seal_artifact))
        .route("/open", post(open_artifact))
        .route("/metadata/seal", post(seal_metadata))
        .route("/metadata/open", post(open_metadata))
}
