//! Tenant REST API Routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use depot_core::{is_valid_slug, TenantId, TenantPlan};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::TenantExtractor;
use crate::state::AppState;
use crate::tenant::TenantResolver;

// ============================================================================
// TYPES
// ============================================================================

/// The tenant a request resolved to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    pub request_id: Uuid,
    pub tenant_id: TenantId,
    pub tenant_slug: String,
    pub tenant_name: String,
}

/// Public projection of a tenant, safe for unauthenticated callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantLookupResponse {
    pub tenant_id: TenantId,
    pub slug: String,
    pub name: String,
    pub plan: TenantPlan,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/whoami - Tenant context of the current request
pub async fn whoami(TenantExtractor(ctx): TenantExtractor) -> ApiResult<Json<WhoAmIResponse>> {
    let tenant = ctx.tenant()?;
    Ok(Json(WhoAmIResponse {
        request_id: ctx.request_id(),
        tenant_id: tenant.tenant_id(),
        tenant_slug: tenant.tenant_slug().to_string(),
        tenant_name: tenant.tenant_name().to_string(),
    }))
}

/// GET /api/v1/tenants/lookup/:slug - Resolve a slug before login
pub async fn lookup_tenant(
    State(resolver): State<Arc<TenantResolver>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<TenantLookupResponse>> {
    if !is_valid_slug(&slug) {
        return Err(ApiError::invalid_format("slug", "a URL-safe tenant slug"));
    }
    let tenant = resolver.resolve_by_slug(&slug).await?;
    Ok(Json(TenantLookupResponse {
        tenant_id: tenant.id,
        slug: tenant.slug,
        name: tenant.name,
        plan: tenant.plan,
    }))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/tenants/lookup/:slug", get(lookup_tenant))
}
