//! depot API Server Entry Point
//!
//! Loads and validates configuration, wires the collaborators together,
//! starts the background loops and serves the Axum router until ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use depot_storage::{EncryptionService, KeyCache, LocalKms, ReplicationHealthTracker};
use tokio::sync::watch;

use depot_api::constants::DEFAULT_BIND_ADDR;
use depot_api::onboarding::warn_if_default_credential;
use depot_api::telemetry::{init_tracing, TelemetryConfig};
use depot_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, ComplianceScheduler, DbClient,
    DbConfig, HealthChecker, HttpNodeProber, PgComplianceService, PgTenantStore, TenantResolver,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = ApiConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let db = DbClient::from_config(&DbConfig::from_env())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Encryption
    let kek_id = config
        .encryption
        .kms_key_id
        .clone()
        .ok_or_else(|| ApiError::internal_error("KMS key id not configured"))?;
    let kms = match config.encryption.local_key_bytes()? {
        Some(master) => LocalKms::with_key(kek_id.clone(), master),
        None => {
            tracing::warn!(
                key_id = %kek_id,
                "No DEPOT_KMS_LOCAL_KEY set; generating an ephemeral master key"
            );
            let kms = LocalKms::new();
            kms.create_key(kek_id.clone());
            kms
        }
    };
    let key_cache = Arc::new(KeyCache::new(config.encryption.key_cache_ttl));
    let key_sweeper =
        key_cache.spawn_cleanup(config.encryption.key_cache_sweep_interval, shutdown_rx.clone());
    let encryption = Arc::new(EncryptionService::new(Arc::new(kms), Arc::clone(&key_cache)));

    // Replica health
    let tracker = Arc::new(ReplicationHealthTracker::new(
        config.health.node_failure_threshold,
        config.health.min_quorum,
    ));
    for node in &config.health.storage_nodes {
        tracker.register_node(node.id.clone());
    }
    let prober = Arc::new(HttpNodeProber::new(
        &config.health.storage_nodes,
        config.health.node_probe_timeout,
    )?);
    let probe_loop = tracker.spawn_probe_loop(
        prober,
        config.health.node_probe_interval,
        config.health.node_probe_timeout,
        shutdown_rx.clone(),
    );

    // The key-value cache is an external service with no client wired in
    // here, so health reports it as not configured.
    let health = Arc::new(HealthChecker::new(
        Arc::new(db.clone()),
        Arc::clone(&tracker),
        config.health.clone(),
    ));
    let health_refresh = health.spawn_refresh(config.health.refresh_interval, shutdown_rx.clone());

    // Tenants
    let mut resolver = TenantResolver::new(
        Arc::new(PgTenantStore::new(db.clone())),
        config.tenant.cache_ttl,
    );
    if let Some(slug) = &config.tenant.default_tenant {
        resolver = resolver.with_default_tenant(slug.clone());
    }
    let resolver = Arc::new(resolver);
    let resolver_sweeper =
        resolver.spawn_cleanup(config.tenant.cache_sweep_interval, shutdown_rx.clone());

    // Compliance
    let scheduler = Arc::new(ComplianceScheduler::new(
        Arc::new(PgComplianceService::new(db.clone())),
        config.scheduler.clone(),
    ));
    scheduler.start().await?;

    warn_if_default_credential(&db, config.bootstrap_admin_password.as_ref()).await;

    let state = AppState::new(
        resolver,
        config.tenant.clone(),
        encryption,
        config.encryption.clone(),
        health,
        Arc::clone(&scheduler),
    )
    .with_operator_token(config.operator_token.clone());
    if !state.operator.is_enabled() {
        tracing::info!("DEPOT_OPERATOR_TOKEN unset; operator routes are disabled");
    }
    let app = create_api_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting depot API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await;

    if let Err(e) = scheduler.stop().await {
        tracing::warn!(error = %e, "Compliance scheduler was not running at shutdown");
    }
    let _ = shutdown_tx.send(true);
    for handle in [key_sweeper, probe_loop, health_refresh, resolver_sweeper] {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    tracing::info!("depot API stopped");

    served.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let addr = match (std::env::var("DEPOT_API_BIND"), std::env::var("PORT")) {
        (Ok(bind), _) => bind,
        (Err(_), Ok(port)) => format!("0.0.0.0:{}", port.trim()),
        _ => DEFAULT_BIND_ADDR.to_string(),
    };
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
