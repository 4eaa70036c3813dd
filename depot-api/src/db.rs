//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling via deadpool-postgres, plus the Postgres
//! implementations of the collaborator traits: tenant lookup, the compliance
//! policy functions, and the health probe.
//!
//! Compliance policy lives in `depot_*` SQL functions; this module only calls
//! them.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use depot_core::{
    DepotError, DepotResult, JobReport, RequestContext, StorageError, TenantId, TenantInfo,
    TenantPlan,
};
use depot_storage::{ComplianceService, DatabaseProbe, TenantStore};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::constants::{DEFAULT_DB_POOL_SIZE, DEFAULT_DB_TIMEOUT_SECS};
use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,

    /// PostgreSQL port
    pub port: u16,

    /// Database name
    pub dbname: String,

    /// Database user
    pub user: String,

    /// Database password
    pub password: SecretString,

    /// Maximum pool size
    pub max_size: usize,

    /// Wait timeout when acquiring a connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "depot".to_string(),
            user: "postgres".to_string(),
            password: SecretString::from(String::new()),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("DEPOT_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("DEPOT_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("DEPOT_DB_NAME").unwrap_or_else(|_| "depot".to_string()),
            user: std::env::var("DEPOT_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: SecretString::from(std::env::var("DEPOT_DB_PASSWORD").unwrap_or_default()),
            max_size: std::env::var("DEPOT_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                std::env::var("DEPOT_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

fn db_error(e: impl std::fmt::Display) -> DepotError {
    StorageError::Database {
        reason: e.to_string(),
    }
    .into()
}

/// Database client wrapping a connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> DepotResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!("Connection pool error: {:?}", e);
            match e {
                deadpool_postgres::PoolError::Timeout(_) => StorageError::Timeout {
                    operation: "acquire database connection".to_string(),
                }
                .into(),
                other => db_error(other),
            }
        })
    }

    /// Stored password hash of the bootstrap admin account, if it exists.
    pub async fn admin_password_hash(&self) -> DepotResult<Option<String>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT password_hash FROM depot_admin_users WHERE username = 'admin'",
                &[],
            )
            .await
            .map_err(db_error)?;
        Ok(row.map(|r| r.get(0)))
    }
}

// ============================================================================
// HEALTH PROBE
// ============================================================================

/// Standby replay lag in seconds. NULL on a primary.
const REPLICATION_LAG_QUERY: &str = "SELECT EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp()))::float8";

#[async_trait]
impl DatabaseProbe for DbClient {
    async fn ping(&self) -> DepotResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(db_error)?;
        Ok(())
    }

    async fn replication_lag(&self) -> DepotResult<Option<Duration>> {
        let conn = self.get_conn().await?;
        let row = match conn.query_one(REPLICATION_LAG_QUERY, &[]).await {
            Ok(row) => row,
            Err(e) => {
                // No standby configured.
                tracing::debug!(error = %e, "Replication lag unavailable");
                return Ok(None);
            }
        };
        let lag: Option<f64> = row.get(0);
        Ok(lag.map(|secs| Duration::from_secs_f64(secs.max(0.0))))
    }
}

// ============================================================================
// TENANT STORE
// ============================================================================

/// Tenant lookups against the `depot_tenants` table.
#[derive(Clone)]
pub struct PgTenantStore {
    db: DbClient,
}

impl PgTenantStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

fn tenant_from_row(row: &Row) -> DepotResult<TenantInfo> {
    let id: Uuid = row.get("id");
    let plan: String = row.get("plan");
    let plan = plan.parse::<TenantPlan>().map_err(db_error)?;
    Ok(TenantInfo {
        id: TenantId::new(id),
        slug: row.get("slug"),
        name: row.get("name"),
        is_active: row.get("is_active"),
        plan,
    })
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_active_by_slug(&self, slug: &str) -> DepotResult<Option<TenantInfo>> {
        let conn = self.db.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, slug, name, is_active, plan FROM depot_tenants \
                 WHERE slug = $1 AND is_active",
                &[&slug],
            )
            .await
            .map_err(db_error)?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn find_active_by_id(&self, id: TenantId) -> DepotResult<Option<TenantInfo>> {
        let conn = self.db.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, slug, name, is_active, plan FROM depot_tenants \
                 WHERE id = $1 AND is_active",
                &[&id.as_uuid()],
            )
            .await
            .map_err(db_error)?;
        row.as_ref().map(tenant_from_row).transpose()
    }
}

// ============================================================================
// COMPLIANCE SERVICE
// ============================================================================

/// Compliance passes implemented by `depot_*` SQL functions. Each returns
/// the number of affected rows.
#[derive(Clone)]
pub struct PgComplianceService {
    db: DbClient,
}

impl PgComplianceService {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    async fn affected(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> DepotResult<JobReport> {
        let conn = self.db.get_conn().await?;
        let row = conn.query_one(sql, params).await.map_err(db_error)?;
        let count: i64 = row.get(0);
        Ok(JobReport::affected(count.max(0) as u64))
    }
}

#[async_trait]
impl ComplianceService for PgComplianceService {
    async fn enforce_data_retention(&self, _ctx: &RequestContext) -> DepotResult<JobReport> {
        self.affected("SELECT depot_enforce_retention()", &[]).await
    }

    async fn process_erasure_requests(&self, ctx: &RequestContext) -> DepotResult<JobReport> {
        // The run id ends up in the erasure audit trail.
        let run_id = ctx.request_id();
        self.affected("SELECT depot_process_erasure_requests($1)", &[&run_id])
            .await
    }

    async fn verify_data_integrity(&self, _ctx: &RequestContext) -> DepotResult<JobReport> {
        self.affected("SELECT depot_verify_integrity()", &[]).await
    }

    async fn cleanup_audit_logs(
        &self,
        _ctx: &RequestContext,
        retention: Duration,
    ) -> DepotResult<JobReport> {
        let interval = format!("{} seconds", retention.as_secs());
        self.affected(
            "SELECT depot_cleanup_audit_logs($1::text::interval)",
            &[&interval],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "depot");
        assert_eq!(config.max_size, DEFAULT_DB_POOL_SIZE);
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let config = DbConfig {
            password: SecretString::from("hunter2".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy() -> Result<(), String> {
        // deadpool does not connect until the first checkout.
        let client = DbClient::from_config(&DbConfig::default()).map_err(|e| e.message)?;
        assert_eq!(client.pool_size(), 0);
        Ok(())
    }

    #[test]
    fn test_db_error_maps_to_storage() {
        let err = db_error("connection refused");
        assert!(matches!(err, DepotError::Storage(StorageError::Database { .. })));
    }
}
