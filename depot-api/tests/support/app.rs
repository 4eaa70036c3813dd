//! In-process application wiring for route tests.
//!
//! Builds the full router over scripted collaborators so tests can drive it
//! with `tower::ServiceExt::oneshot` and flip failures on the way.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use depot_api::{
    create_api_router, AppState, ComplianceScheduler, EncryptionConfig, HealthChecker,
    HealthConfig, SchedulerConfig, TenantConfig, TenantResolver,
};
use depot_storage::ReplicationHealthTracker;
use depot_test_utils::fixtures::{encryption_service, store_with};
use depot_test_utils::{
    CountingTenantStore, FlakyKms, RecordingComplianceService, ScriptedCache,
    ScriptedDatabaseProbe,
};
use tower::ServiceExt;

pub const TEST_KEK: &str = "test-kek";
pub const OPERATOR_TOKEN: &str = "test-operator-token";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<CountingTenantStore>,
    pub resolver: Arc<TenantResolver>,
    pub kms: Arc<FlakyKms>,
    pub db: Arc<ScriptedDatabaseProbe>,
    pub cache: Arc<ScriptedCache>,
    pub tracker: Arc<ReplicationHealthTracker>,
    pub service: Arc<RecordingComplianceService>,
    pub scheduler: Arc<ComplianceScheduler>,
}

/// An app knowing `slugs`, with two healthy storage replicas.
pub fn test_app(slugs: &[&str]) -> TestApp {
    test_app_with(slugs, TenantConfig::default())
}

pub fn test_app_with(slugs: &[&str], tenant_config: TenantConfig) -> TestApp {
    build(slugs, tenant_config, Some(OPERATOR_TOKEN))
}

/// Same as [`test_app`] with no operator token configured.
pub fn test_app_without_operator(slugs: &[&str]) -> TestApp {
    build(slugs, TenantConfig::default(), None)
}

fn build(slugs: &[&str], tenant_config: TenantConfig, operator_token: Option<&str>) -> TestApp {
    let store = store_with(slugs);
    let resolver = Arc::new(TenantResolver::new(store.clone(), tenant_config.cache_ttl));

    let kms = Arc::new(FlakyKms::new(TEST_KEK));
    let encryption = Arc::new(encryption_service(kms.clone()));
    let encryption_config = EncryptionConfig {
        kms_key_id: Some(TEST_KEK.to_string()),
        ..Default::default()
    };

    let db = Arc::new(ScriptedDatabaseProbe::new());
    let cache = Arc::new(ScriptedCache::new());
    let tracker = Arc::new(ReplicationHealthTracker::default());
    for node in ["node-a", "node-b"] {
        tracker.register_node(node);
        tracker.record_success(node);
    }
    let health = Arc::new(
        HealthChecker::new(db.clone(), tracker.clone(), HealthConfig::default())
            .with_cache(cache.clone()),
    );

    let service = Arc::new(RecordingComplianceService::new());
    let scheduler = Arc::new(ComplianceScheduler::new(
        service.clone(),
        SchedulerConfig {
            run_retention_on_start: false,
            ..Default::default()
        },
    ));

    let state = AppState::new(
        resolver.clone(),
        tenant_config,
        encryption,
        encryption_config,
        health,
        scheduler.clone(),
    )
    .with_operator_token(operator_token.map(|token| token.to_string().into()));

    TestApp {
        router: create_api_router(state),
        store,
        resolver,
        kms,
        db,
        cache,
        tracker,
        service,
        scheduler,
    }
}

pub fn get(uri: &str, tenant: Option<&str>) -> Result<Request<Body>, String> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(slug) = tenant {
        builder = builder.header("x-tenant-slug", slug);
    }
    builder.body(Body::empty()).map_err(|e| e.to_string())
}

pub fn post_json(
    uri: &str,
    tenant: Option<&str>,
    body: &serde_json::Value,
) -> Result<Request<Body>, String> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(slug) = tenant {
        builder = builder.header("x-tenant-slug", slug);
    }
    builder
        .body(Body::from(body.to_string()))
        .map_err(|e| e.to_string())
}

/// POST with no body, carrying `token` as the operator bearer token.
pub fn post_operator(
    uri: &str,
    tenant: Option<&str>,
    token: Option<&str>,
) -> Result<Request<Body>, String> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(slug) = tenant {
        builder = builder.header("x-tenant-slug", slug);
    }
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).map_err(|e| e.to_string())
}

/// Send one request and decode the body as JSON (`Null` when empty or not JSON).
pub async fn send(
    router: &Router,
    request: Request<Body>,
) -> Result<(StatusCode, serde_json::Value), String> {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    Ok((status, json))
}
