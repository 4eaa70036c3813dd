//! Tenant resolution at the HTTP boundary.
//!
//! Every request outside the public allow-list must resolve to an active
//! tenant before any handler runs. The middleware looks for a tenant signal
//! in this order:
//!
//! 1. the override header (default `X-Tenant-Slug`)
//! 2. the subdomain of `Host` relative to the configured base domain
//! 3. the configured default tenant, if the deployment allows one
//!
//! With no signal and no default the request is rejected with
//! `tenant_required`. On success a [`RequestContext`] carrying the tenant is
//! inserted into the request extensions and the tenant id and slug are echoed
//! in the response headers.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use depot_core::{is_valid_slug, RequestContext, TenantContext, TenantError, TenantInfo};

use crate::config::TenantConfig;
use crate::constants::{TENANT_ID_RESPONSE_HEADER, TENANT_SLUG_RESPONSE_HEADER};
use crate::error::{ApiError, ErrorCode};
use crate::telemetry::metrics;
use crate::tenant::TenantResolver;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for the tenant middleware.
#[derive(Debug, Clone)]
pub struct TenantMiddlewareState {
    pub resolver: Arc<TenantResolver>,
    pub config: Arc<TenantConfig>,
}

impl TenantMiddlewareState {
    pub fn new(resolver: Arc<TenantResolver>, config: TenantConfig) -> Self {
        Self {
            resolver,
            config: Arc::new(config),
        }
    }
}

/// Where the tenant signal came from. Used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalSource {
    Header,
    Subdomain,
    Default,
}

impl SignalSource {
    fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Header => "header",
            SignalSource::Subdomain => "subdomain",
            SignalSource::Default => "default",
        }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Resolve the tenant for a request and attach it as a [`RequestContext`].
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/v1/whoami", get(whoami))
///     .layer(middleware::from_fn_with_state(tenant_state, tenant_middleware));
/// ```
pub async fn tenant_middleware(
    State(state): State<TenantMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.is_public_path(request.uri().path()) {
        request.extensions_mut().insert(RequestContext::new());
        return Ok(next.run(request).await);
    }

    let (source, resolved) = match tenant_signal(&request, &state.config)? {
        Some((source, slug)) => (source, state.resolver.resolve_by_slug(&slug).await),
        None if state.config.allow_default_tenant => {
            (SignalSource::Default, state.resolver.default_tenant().await)
        }
        None => {
            record_resolution("none", "required");
            return Err(ApiError::tenant_required());
        }
    };

    let tenant = match resolved {
        Ok(tenant) => {
            record_resolution(source.as_str(), "resolved");
            tenant
        }
        Err(err) => {
            record_resolution(source.as_str(), resolution_outcome(&err));
            tracing::debug!(source = source.as_str(), error = %err, "Tenant resolution failed");
            return Err(err.into());
        }
    };

    let ctx = RequestContext::new().with_tenant_context(TenantContext::from(&tenant));
    tracing::debug!(
        request_id = %ctx.request_id(),
        tenant_id = %tenant.id,
        tenant_slug = %tenant.slug,
        source = source.as_str(),
        "Tenant resolved"
    );
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    echo_tenant_headers(&mut response, &tenant);
    Ok(response)
}

/// Explicit header first, then subdomain.
fn tenant_signal(
    request: &Request,
    config: &TenantConfig,
) -> Result<Option<(SignalSource, String)>, ApiError> {
    if let Some(value) = request.headers().get(config.header_name.as_str()) {
        let slug = value
            .to_str()
            .map(|s| s.trim().to_ascii_lowercase())
            .map_err(|_| ApiError::invalid_format(&config.header_name, "a URL-safe tenant slug"))?;
        if !slug.is_empty() {
            if !is_valid_slug(&slug) {
                return Err(ApiError::invalid_format(
                    &config.header_name,
                    "a URL-safe tenant slug",
                ));
            }
            return Ok(Some((SignalSource::Header, slug)));
        }
    }

    let Some(base_domain) = config.base_domain.as_deref() else {
        return Ok(None);
    };
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()));

    Ok(host
        .and_then(|host| extract_subdomain(host, base_domain))
        .map(|slug| (SignalSource::Subdomain, slug)))
}

fn resolution_outcome(err: &TenantError) -> &'static str {
    match err {
        TenantError::NotFound { .. } => "not_found",
        TenantError::StoreUnavailable { .. } => "error",
        TenantError::DefaultNotConfigured => "required",
    }
}

fn record_resolution(source: &str, outcome: &str) {
    if let Some(m) = metrics() {
        m.record_tenant_resolution(source, outcome);
    }
}

fn echo_tenant_headers(response: &mut Response, tenant: &TenantInfo) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&tenant.id.to_string()) {
        headers.insert(TENANT_ID_RESPONSE_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&tenant.slug) {
        headers.insert(TENANT_SLUG_RESPONSE_HEADER, value);
    }
}

// ============================================================================
// SUBDOMAIN PARSING
// ============================================================================

/// Extract the tenant slug from a `Host` value.
///
/// The slug is the label directly left of `base_domain`, so
/// `api.alpha.example.com` yields `alpha`. Returns `None` for the bare base
/// domain, for `localhost` and IP literals, for hosts outside the base
/// domain, and for labels that are not valid slugs.
pub fn extract_subdomain(host: &str, base_domain: &str) -> Option<String> {
    let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host == "localhost" || host.ends_with(".localhost") {
        return None;
    }
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let base = base_domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if base.is_empty() || host == base {
        return None;
    }

    let prefix = host.strip_suffix(base.as_str())?.strip_suffix('.')?;
    let label = prefix.rsplit('.').next()?;
    is_valid_slug(label).then(|| label.to_string())
}

fn strip_port(host: &str) -> &str {
    // [v6]:port
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    // Bare v6 literal, no port.
    if host.matches(':').count() > 1 {
        return host;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed extractor for a tenant-scoped [`RequestContext`].
///
/// Rejects with `missing_tenant_context` if the route is not behind
/// [`tenant_middleware`] or sits on the public allow-list.
#[derive(Debug, Clone)]
pub struct TenantExtractor(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for TenantExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .filter(|ctx| ctx.has_tenant())
            .cloned()
            .map(TenantExtractor)
            .ok_or_else(|| {
                tracing::error!("Tenant-scoped handler reached without tenant context");
                ApiError::from_code(ErrorCode::MissingTenantContext)
            })
    }
}

impl std::ops::Deref for TenantExtractor {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
