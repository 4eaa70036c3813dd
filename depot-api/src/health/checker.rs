//! Aggregated service health.
//!
//! A check probes the database, the cache and replica quorum concurrently
//! and waits for all three, so one report describes a single window of time.
//! Every probe in a check shares one deadline of `check_timeout`.
//! The latest report is cached; `/health` serves the cache and a background
//! ticker keeps it fresh.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use depot_core::{DepotResult, HealthStatus, Timestamp};
use depot_storage::{CacheClient, DatabaseProbe, ReplicationHealthTracker, ReplicationSnapshot};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::HealthConfig;
use crate::telemetry::metrics;

// ============================================================================
// REPORT TYPES
// ============================================================================

/// Health of one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency.as_millis() as u64),
            message: None,
        }
    }

    fn degraded(latency: Option<Duration>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            latency_ms: latency.map(|l| l.as_millis() as u64),
            message: Some(message.into()),
        }
    }

    fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Result of one [`HealthChecker::check_health`] run.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub replication: ReplicationSnapshot,
    pub checked_at: Timestamp,
    pub duration_ms: u64,
}

/// One named readiness condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessCheck {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReadinessCheck {
    fn pass() -> Self {
        Self {
            ready: true,
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: Some(message.into()),
        }
    }
}

/// Result of [`HealthChecker::verify_readiness`]. Every condition is
/// reported by name, not just the conjunction.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub checks: BTreeMap<&'static str, ReadinessCheck>,
}

/// Combine component statuses. Database or replication failure makes the
/// service unhealthy; anything else short of healthy makes it degraded.
pub fn overall_status(
    database: HealthStatus,
    cache: HealthStatus,
    replication: HealthStatus,
) -> HealthStatus {
    if database == HealthStatus::Unhealthy || replication == HealthStatus::Unhealthy {
        HealthStatus::Unhealthy
    } else if database.max(cache).max(replication) != HealthStatus::Healthy {
        // An unreachable cache lands here.
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// ============================================================================
// CHECKER
// ============================================================================

/// Runs health and readiness checks over the service's dependencies.
pub struct HealthChecker {
    db: Arc<dyn DatabaseProbe>,
    cache: Option<Arc<dyn CacheClient>>,
    tracker: Arc<ReplicationHealthTracker>,
    config: HealthConfig,
    last_report: RwLock<Option<HealthReport>>,
}

impl HealthChecker {
    /// A checker with no cache client. Until [`with_cache`](Self::with_cache)
    /// attaches one, the cache component reports degraded as not configured.
    pub fn new(
        db: Arc<dyn DatabaseProbe>,
        tracker: Arc<ReplicationHealthTracker>,
        config: HealthConfig,
    ) -> Self {
        Self {
            db,
            cache: None,
            tracker,
            config,
            last_report: RwLock::new(None),
        }
    }

    /// Probe `cache` for reachability on every check.
    pub fn with_cache(mut self, cache: Arc<dyn CacheClient>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn tracker(&self) -> &Arc<ReplicationHealthTracker> {
        &self.tracker
    }

    /// Run all probes now, cache the result and return it.
    pub async fn check_health(&self) -> HealthReport {
        let start = Instant::now();
        let deadline = start + self.config.check_timeout;

        let (database, cache, replication) = tokio::join!(
            self.check_database(deadline),
            self.check_cache(deadline),
            async { self.tracker.snapshot() },
        );

        let status = overall_status(database.status, cache.status, replication.status);
        let report = HealthReport {
            status,
            database,
            cache,
            replication,
            checked_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if let Some(m) = metrics() {
            m.set_health(status, report.replication.healthy_nodes);
        }
        if !status.is_healthy() {
            tracing::warn!(
                status = %status,
                database = %report.database.status,
                cache = %report.cache.status,
                replication = %report.replication.status,
                "Service health check not healthy"
            );
        }

        *self
            .last_report
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        report
    }

    /// The most recent report, if any check has completed.
    pub fn cached_report(&self) -> Option<HealthReport> {
        self.last_report
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The cached report, or a fresh one if nothing is cached yet.
    pub async fn current_health(&self) -> HealthReport {
        match self.cached_report() {
            Some(report) => report,
            None => self.check_health().await,
        }
    }

    /// Stricter gate for startup and load balancers: database reachable,
    /// replica quorum met and configuration valid.
    pub async fn verify_readiness(&self) -> ReadinessReport {
        let database = match bounded(Instant::now() + self.config.readiness_timeout, self.db.ping()).await {
            Ok(()) => ReadinessCheck::pass(),
            Err(e) => ReadinessCheck::fail(e),
        };

        let healthy = self.tracker.healthy_count();
        let total = self.tracker.total_count();
        let min_quorum = self.tracker.min_quorum();
        let quorum = format!("{} of {} replicas healthy, {} required", healthy, total, min_quorum);
        let replication = if healthy >= min_quorum {
            ReadinessCheck {
                ready: true,
                message: Some(quorum),
            }
        } else {
            ReadinessCheck::fail(quorum)
        };

        let configuration = match self.config.validate() {
            Ok(()) => ReadinessCheck::pass(),
            Err(e) => ReadinessCheck::fail(e.to_string()),
        };

        let checks = BTreeMap::from([
            ("database", database),
            ("replication", replication),
            ("configuration", configuration),
        ]);
        let ready = checks.values().all(|check| check.ready);
        ReadinessReport { ready, checks }
    }

    /// Re-run [`check_health`](Self::check_health) every `interval` until
    /// `shutdown` flips to `true`. The first check runs immediately.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Health refresher shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        checker.check_health().await;
                    }
                }
            }
        })
    }

    /// Ping, then query replication lag with whatever is left of `deadline`.
    async fn check_database(&self, deadline: Instant) -> ComponentHealth {
        let start = Instant::now();
        if let Err(e) = bounded(deadline, self.db.ping()).await {
            return ComponentHealth::unhealthy(e);
        }
        let latency = start.elapsed();

        match bounded(deadline, self.db.replication_lag()).await {
            Ok(Some(lag)) if lag > self.config.max_replication_lag => ComponentHealth::degraded(
                Some(latency),
                format!(
                    "replication lag {}s exceeds {}s",
                    lag.as_secs(),
                    self.config.max_replication_lag.as_secs()
                ),
            ),
            // No standby, or a standby within bounds.
            Ok(_) => ComponentHealth::healthy(latency),
            Err(e) => ComponentHealth::degraded(Some(latency), format!("replication lag unknown: {}", e)),
        }
    }

    async fn check_cache(&self, deadline: Instant) -> ComponentHealth {
        let Some(cache) = &self.cache else {
            return ComponentHealth::degraded(None, "cache client not configured");
        };
        let start = Instant::now();
        match bounded(deadline, cache.ping()).await {
            Ok(()) => ComponentHealth::healthy(start.elapsed()),
            Err(e) => ComponentHealth::degraded(None, e),
        }
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("cache_configured", &self.cache.is_some())
            .field("tracker", &self.tracker)
            .field("config", &self.config)
            .finish()
    }
}

/// Run a probe until `deadline`, flattening both failure kinds to a message.
async fn bounded<T>(
    deadline: Instant,
    probe: impl Future<Output = DepotResult<T>>,
) -> Result<T, String> {
    match tokio::time::timeout_at(deadline, probe).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("timed out before the check deadline".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_test_utils::{ScriptedCache, ScriptedDatabaseProbe};
    use HealthStatus::{Degraded, Healthy, Unhealthy};

    struct Fixture {
        db: Arc<ScriptedDatabaseProbe>,
        cache: Arc<ScriptedCache>,
        tracker: Arc<ReplicationHealthTracker>,
        checker: Arc<HealthChecker>,
    }

    /// `healthy` of `total` nodes reporting healthy, default quorum of 2.
    fn fixture(healthy: usize, total: usize) -> Fixture {
        let db = Arc::new(ScriptedDatabaseProbe::new());
        let cache = Arc::new(ScriptedCache::new());
        let tracker = Arc::new(ReplicationHealthTracker::default());
        for i in 0..total {
            let id = format!("node-{}", i);
            tracker.register_node(id.clone());
            if i < healthy {
                tracker.record_success(&id);
            }
        }
        let checker = Arc::new(
            HealthChecker::new(db.clone(), tracker.clone(), HealthConfig::default())
                .with_cache(cache.clone()),
        );
        Fixture {
            db,
            cache,
            tracker,
            checker,
        }
    }

    #[test]
    fn test_overall_status_precedence() {
        let all = [Healthy, Degraded, Unhealthy];
        for db in all {
            for cache in all {
                for repl in all {
                    let expected = if db == Unhealthy || repl == Unhealthy {
                        Unhealthy
                    } else if db == Healthy && cache == Healthy && repl == Healthy {
                        Healthy
                    } else {
                        Degraded
                    };
                    assert_eq!(
                        overall_status(db, cache, repl),
                        expected,
                        "db={db} cache={cache} repl={repl}"
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let f = fixture(3, 3);
        let report = f.checker.check_health().await;
        assert_eq!(report.status, Healthy);
        assert_eq!(report.replication.healthy_nodes, 3);
        assert!(report.database.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_database_down_is_unhealthy() {
        let f = fixture(3, 3);
        f.db.fail_ping(true);
        let report = f.checker.check_health().await;
        assert_eq!(report.database.status, Unhealthy);
        assert_eq!(report.status, Unhealthy);
    }

    #[tokio::test]
    async fn test_replication_lag_degrades() {
        let f = fixture(3, 3);
        f.db.set_lag(Some(Duration::from_secs(45)));
        let report = f.checker.check_health().await;
        assert_eq!(report.database.status, Degraded);
        assert_eq!(report.status, Degraded);

        f.db.set_lag(Some(Duration::from_secs(10)));
        assert_eq!(f.checker.check_health().await.status, Healthy);
    }

    #[tokio::test]
    async fn test_cache_down_only_degrades() {
        let f = fixture(3, 3);
        f.cache.fail_ping(true);
        let report = f.checker.check_health().await;
        assert_eq!(report.cache.status, Degraded);
        assert_eq!(report.status, Degraded);
    }

    #[tokio::test]
    async fn test_lost_quorum_is_unhealthy() {
        let f = fixture(1, 3);
        assert_eq!(f.checker.check_health().await.status, Unhealthy);

        f.tracker.record_success("node-1");
        assert_eq!(f.checker.check_health().await.status, Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_database_hits_deadline() {
        let f = fixture(2, 2);
        f.db.set_delay(Duration::from_secs(60));

        let report = f.checker.check_health().await;
        assert_eq!(report.database.status, Unhealthy);
        assert!(report
            .database
            .message
            .as_deref()
            .is_some_and(|m| m.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_database_shares_one_deadline() {
        let f = fixture(2, 2);
        let budget = HealthConfig::default().check_timeout;
        f.db.set_delay(budget - Duration::from_millis(500));

        let start = Instant::now();
        let report = f.checker.check_health().await;
        assert!(
            start.elapsed() <= budget,
            "check took {:?}, budget {:?}",
            start.elapsed(),
            budget
        );
        // The ping made it; the lag query ran out of time.
        assert_eq!(report.database.status, Degraded);
        assert!(report
            .database
            .message
            .as_deref()
            .is_some_and(|m| m.contains("replication lag unknown")));
    }

    #[tokio::test]
    async fn test_missing_cache_client_is_degraded() {
        let f = fixture(2, 2);
        let checker = HealthChecker::new(f.db.clone(), f.tracker.clone(), HealthConfig::default());

        let report = checker.check_health().await;
        assert_eq!(report.cache.status, Degraded);
        assert_eq!(
            report.cache.message.as_deref(),
            Some("cache client not configured")
        );
        assert_eq!(report.status, Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_exits_when_sender_dropped() {
        let f = fixture(2, 2);
        let (tx, rx) = watch::channel(false);
        let handle = f.checker.spawn_refresh(Duration::from_secs(15), rx);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresher exits without a sender")
            .expect("join");
    }

    #[tokio::test]
    async fn test_report_is_cached() {
        let f = fixture(2, 2);
        assert!(f.checker.cached_report().is_none());

        f.checker.check_health().await;
        let pings = f.db.ping_count();
        let cached = f.checker.current_health().await;
        assert_eq!(cached.status, Healthy);
        assert_eq!(f.db.ping_count(), pings);
    }

    #[tokio::test]
    async fn test_readiness_names_each_check() {
        let f = fixture(1, 3);
        let report = f.checker.verify_readiness().await;
        assert!(!report.ready);
        assert!(report.checks["database"].ready);
        assert!(!report.checks["replication"].ready);
        assert!(report.checks["configuration"].ready);

        f.tracker.record_success("node-2");
        assert!(f.checker.verify_readiness().await.ready);

        f.db.fail_ping(true);
        let report = f.checker.verify_readiness().await;
        assert!(!report.ready);
        assert!(!report.checks["database"].ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_populates_cache_and_stops() {
        let f = fixture(2, 2);
        let (tx, rx) = watch::channel(false);
        let handle = f.checker.spawn_refresh(Duration::from_secs(15), rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.checker.cached_report().is_some());

        tx.send(true).expect("send");
        handle.await.expect("refresher exits");
    }
}
