//! Shared application state for Axum routers.

use std::sync::Arc;

use depot_storage::EncryptionService;
use secrecy::SecretString;

use crate::config::{EncryptionConfig, TenantConfig};
use crate::health::HealthChecker;
use crate::jobs::ComplianceScheduler;
use crate::middleware::{OperatorCredential, TenantMiddlewareState};
use crate::tenant::TenantResolver;

/// Application-wide state shared across all routes. Everything in here is
/// owned by the composition root in `main` and handed out by reference.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<TenantResolver>,
    pub tenant_config: Arc<TenantConfig>,
    pub encryption: Arc<EncryptionService>,
    pub encryption_config: Arc<EncryptionConfig>,
    pub health: Arc<HealthChecker>,
    pub scheduler: Arc<ComplianceScheduler>,
    pub operator: OperatorCredential,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        resolver: Arc<TenantResolver>,
        tenant_config: TenantConfig,
        encryption: Arc<EncryptionService>,
        encryption_config: EncryptionConfig,
        health: Arc<HealthChecker>,
        scheduler: Arc<ComplianceScheduler>,
    ) -> Self {
        Self {
            resolver,
            tenant_config: Arc::new(tenant_config),
            encryption,
            encryption_config: Arc::new(encryption_config),
            health,
            scheduler,
            operator: OperatorCredential::default(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Enable operator-only routes behind `token`. `None` keeps them disabled.
    pub fn with_operator_token(mut self, token: Option<SecretString>) -> Self {
        self.operator = OperatorCredential::new(token);
        self
    }

    /// State for [`tenant_middleware`](crate::middleware::tenant_middleware).
    pub fn tenant_middleware_state(&self) -> TenantMiddlewareState {
        TenantMiddlewareState {
            resolver: Arc::clone(&self.resolver),
            config: Arc::clone(&self.tenant_config),
        }
    }
}

crate::impl_from_ref!(Arc<TenantResolver>, resolver);
crate::impl_from_ref!(Arc<EncryptionService>, encryption);
crate::impl_from_ref!(Arc<EncryptionConfig>, encryption_config);
crate::impl_from_ref!(Arc<HealthChecker>, health);
crate::impl_from_ref!(Arc<ComplianceScheduler>, scheduler);
crate::impl_from_ref!(OperatorCredential, operator);
crate::impl_from_ref!(std::time::Instant, start_time);
