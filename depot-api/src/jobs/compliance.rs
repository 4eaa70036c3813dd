//! Compliance Scheduler
//!
//! Four independent background loops, one per [`JobKind`]:
//!
//! - retention enforcement (daily, also once at start)
//! - erasure request processing (every 6 hours)
//! - integrity verification (weekly)
//! - audit log cleanup (monthly)
//!
//! Each loop selects between its own ticker and a shared shutdown signal.
//! Stop is cooperative: a run in progress finishes (bounded by the job
//! timeout) before its loop observes the signal. A failed or timed-out run is
//! logged and recorded; the loop keeps ticking.
//!
//! ```ignore
//! let scheduler = ComplianceScheduler::new(service, SchedulerConfig::from_env());
//! scheduler.start().await?;
//! // ...
//! scheduler.stop().await?; // returns once all four loops have exited
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use depot_core::{ConfigError, JobKind, RequestContext, SchedulerError, Timestamp};
use depot_storage::{run_compliance_job, ComplianceService};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::{env_lookup, flag_or, secs_or, Lookup};
use crate::constants::{
    DEFAULT_AUDIT_CLEANUP_INTERVAL_SECS, DEFAULT_AUDIT_RETENTION_SECS,
    DEFAULT_ERASURE_INTERVAL_SECS, DEFAULT_INTEGRITY_INTERVAL_SECS, DEFAULT_JOB_TIMEOUT_SECS,
    DEFAULT_RETENTION_INTERVAL_SECS,
};
use crate::telemetry::metrics;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the compliance scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Retention enforcement interval (default: 24 hours)
    pub retention_interval: Duration,

    /// Erasure request processing interval (default: 6 hours)
    pub erasure_interval: Duration,

    /// Integrity verification interval (default: 7 days)
    pub integrity_interval: Duration,

    /// Audit log cleanup interval (default: 30 days)
    pub audit_cleanup_interval: Duration,

    /// Upper bound on one run of any job (default: 30 minutes)
    pub job_timeout: Duration,

    /// Audit entries older than this are purged (default: 365 days)
    pub audit_retention: Duration,

    /// Run retention enforcement immediately on start (default: true)
    pub run_retention_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retention_interval: Duration::from_secs(DEFAULT_RETENTION_INTERVAL_SECS),
            erasure_interval: Duration::from_secs(DEFAULT_ERASURE_INTERVAL_SECS),
            integrity_interval: Duration::from_secs(DEFAULT_INTEGRITY_INTERVAL_SECS),
            audit_cleanup_interval: Duration::from_secs(DEFAULT_AUDIT_CLEANUP_INTERVAL_SECS),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            audit_retention: Duration::from_secs(DEFAULT_AUDIT_RETENTION_SECS),
            run_retention_on_start: true,
        }
    }
}

impl SchedulerConfig {
    /// Create SchedulerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `DEPOT_RETENTION_INTERVAL_SECS` (default: 86400)
    /// - `DEPOT_ERASURE_INTERVAL_SECS` (default: 21600)
    /// - `DEPOT_INTEGRITY_INTERVAL_SECS` (default: 604800)
    /// - `DEPOT_AUDIT_CLEANUP_INTERVAL_SECS` (default: 2592000)
    /// - `DEPOT_JOB_TIMEOUT_SECS` (default: 1800)
    /// - `DEPOT_AUDIT_RETENTION_SECS` (default: 31536000)
    /// - `DEPOT_RETENTION_ON_START` (default: true)
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub(crate) fn from_lookup(get: Lookup<'_>) -> Self {
        Self {
            retention_interval: secs_or(
                get,
                "DEPOT_RETENTION_INTERVAL_SECS",
                DEFAULT_RETENTION_INTERVAL_SECS,
            ),
            erasure_interval: secs_or(get, "DEPOT_ERASURE_INTERVAL_SECS", DEFAULT_ERASURE_INTERVAL_SECS),
            integrity_interval: secs_or(
                get,
                "DEPOT_INTEGRITY_INTERVAL_SECS",
                DEFAULT_INTEGRITY_INTERVAL_SECS,
            ),
            audit_cleanup_interval: secs_or(
                get,
                "DEPOT_AUDIT_CLEANUP_INTERVAL_SECS",
                DEFAULT_AUDIT_CLEANUP_INTERVAL_SECS,
            ),
            job_timeout: secs_or(get, "DEPOT_JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS),
            audit_retention: secs_or(get, "DEPOT_AUDIT_RETENTION_SECS", DEFAULT_AUDIT_RETENTION_SECS),
            run_retention_on_start: flag_or(get, "DEPOT_RETENTION_ON_START", true),
        }
    }

    /// Short intervals for local development.
    pub fn development() -> Self {
        Self {
            retention_interval: Duration::from_secs(60),
            erasure_interval: Duration::from_secs(30),
            integrity_interval: Duration::from_secs(300),
            audit_cleanup_interval: Duration::from_secs(600),
            job_timeout: Duration::from_secs(60),
            audit_retention: Duration::from_secs(DEFAULT_AUDIT_RETENTION_SECS),
            run_retention_on_start: true,
        }
    }

    pub fn interval(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Retention => self.retention_interval,
            JobKind::Erasure => self.erasure_interval,
            JobKind::Integrity => self.integrity_interval,
            JobKind::AuditCleanup => self.audit_cleanup_interval,
        }
    }

    pub fn runs_on_start(&self, kind: JobKind) -> bool {
        kind == JobKind::Retention && self.run_retention_on_start
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("DEPOT_RETENTION_INTERVAL_SECS", self.retention_interval),
            ("DEPOT_ERASURE_INTERVAL_SECS", self.erasure_interval),
            ("DEPOT_INTEGRITY_INTERVAL_SECS", self.integrity_interval),
            ("DEPOT_AUDIT_CLEANUP_INTERVAL_SECS", self.audit_cleanup_interval),
            ("DEPOT_JOB_TIMEOUT_SECS", self.job_timeout),
        ];
        for (field, value) in checks {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// JOB STATE
// ============================================================================

/// How one run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobOutcome {
    Succeeded {
        affected: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Failed {
        error: String,
    },
    TimedOut {
        after_secs: u64,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded { .. } => "success",
            JobOutcome::Failed { .. } => "failure",
            JobOutcome::TimedOut { .. } => "timeout",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct JobState {
    last_run: Option<Timestamp>,
    last_outcome: Option<JobOutcome>,
    runs: u64,
    failures: u64,
}

/// Per-job view returned by [`ComplianceScheduler::status`].
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: JobKind,
    pub interval_secs: u64,
    pub last_run: Option<Timestamp>,
    pub last_outcome: Option<JobOutcome>,
    pub runs: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct SchedulerInner {
    service: Arc<dyn ComplianceService>,
    config: SchedulerConfig,
    jobs: RwLock<HashMap<JobKind, JobState>>,
    running: AtomicBool,
    active_loops: AtomicUsize,
}

struct RunningLoops {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the four compliance loops. Construct one per process.
pub struct ComplianceScheduler {
    inner: Arc<SchedulerInner>,
    loops: Mutex<Option<RunningLoops>>,
}

impl ComplianceScheduler {
    pub fn new(service: Arc<dyn ComplianceService>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                service,
                config,
                jobs: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                active_loops: AtomicUsize::new(0),
            }),
            loops: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Spawn all four loops.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut loops = self.loops.lock().await;
        if loops.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown, rx) = watch::channel(false);
        let handles = JobKind::ALL
            .into_iter()
            .map(|kind| {
                self.inner.active_loops.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(job_loop(Arc::clone(&self.inner), kind, rx.clone()))
            })
            .collect();

        *loops = Some(RunningLoops { shutdown, handles });
        self.inner.running.store(true, Ordering::SeqCst);

        tracing::info!(
            retention_secs = self.inner.config.retention_interval.as_secs(),
            erasure_secs = self.inner.config.erasure_interval.as_secs(),
            integrity_secs = self.inner.config.integrity_interval.as_secs(),
            audit_cleanup_secs = self.inner.config.audit_cleanup_interval.as_secs(),
            "Compliance scheduler started"
        );
        Ok(())
    }

    /// Signal every loop and wait until all of them have exited.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut loops = self.loops.lock().await;
        let RunningLoops { shutdown, handles } = loops.take().ok_or(SchedulerError::NotRunning)?;

        self.inner.running.store(false, Ordering::SeqCst);
        let _ = shutdown.send(true);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Compliance job loop panicked");
            }
        }

        tracing::info!("Compliance scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Loops that have not yet passed their stop branch.
    pub fn active_loops(&self) -> usize {
        self.inner.active_loops.load(Ordering::SeqCst)
    }

    /// Run one job now, outside its schedule. The returned handle resolves to
    /// the run's outcome.
    pub fn trigger_job(&self, kind: JobKind) -> Result<JoinHandle<JobOutcome>, SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        tracing::info!(job = %kind, "Compliance job triggered manually");
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move { inner.run_job(kind).await }))
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        SchedulerStatus {
            running: self.is_running(),
            jobs: JobKind::ALL
                .into_iter()
                .map(|kind| {
                    let state = jobs.get(&kind).cloned().unwrap_or_default();
                    JobStatus {
                        job: kind,
                        interval_secs: self.inner.config.interval(kind).as_secs(),
                        last_run: state.last_run,
                        last_outcome: state.last_outcome,
                        runs: state.runs,
                        failures: state.failures,
                    }
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for ComplianceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceScheduler")
            .field("running", &self.is_running())
            .field("active_loops", &self.active_loops())
            .field("config", &self.inner.config)
            .finish()
    }
}

async fn job_loop(inner: Arc<SchedulerInner>, kind: JobKind, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.interval(kind);
    let first = if inner.config.runs_on_start(kind) {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender also means stop.
                if changed.is_err() || *shutdown.borrow() {
                    inner.active_loops.fetch_sub(1, Ordering::SeqCst);
                    tracing::debug!(job = %kind, "Compliance job loop exiting");
                    break;
                }
            }
            _ = ticker.tick() => {
                inner.run_job(kind).await;
            }
        }
    }
}

impl SchedulerInner {
    async fn run_job(&self, kind: JobKind) -> JobOutcome {
        let ctx = RequestContext::background(kind);
        let started = Instant::now();
        tracing::info!(job = %kind, run_id = %ctx.request_id(), "Compliance job started");

        let run = run_compliance_job(
            self.service.as_ref(),
            kind,
            &ctx,
            self.config.audit_retention,
        );
        let outcome = match tokio::time::timeout(self.config.job_timeout, run).await {
            Ok(Ok(report)) => JobOutcome::Succeeded {
                affected: report.affected,
                detail: report.detail,
            },
            Ok(Err(e)) => JobOutcome::Failed {
                error: e.to_string(),
            },
            Err(_) => JobOutcome::TimedOut {
                after_secs: self.config.job_timeout.as_secs(),
            },
        };

        let elapsed = started.elapsed();
        match &outcome {
            JobOutcome::Succeeded { affected, .. } => tracing::info!(
                job = %kind,
                run_id = %ctx.request_id(),
                affected,
                duration_ms = elapsed.as_millis() as u64,
                "Compliance job completed"
            ),
            JobOutcome::Failed { error } => tracing::error!(
                job = %kind,
                run_id = %ctx.request_id(),
                error = %error,
                "Compliance job failed"
            ),
            JobOutcome::TimedOut { after_secs } => tracing::error!(
                job = %kind,
                run_id = %ctx.request_id(),
                after_secs,
                "Compliance job timed out"
            ),
        }
        if let Some(m) = metrics() {
            m.record_job_run(kind, outcome.label(), elapsed.as_secs_f64());
        }

        let mut jobs = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = jobs.entry(kind).or_default();
        state.last_run = Some(Utc::now());
        state.runs += 1;
        if !outcome.is_success() {
            state.failures += 1;
        }
        state.last_outcome = Some(outcome.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::lookup_from;
    use depot_core::WorkOrigin;
    use depot_test_utils::RecordingComplianceService;

    fn scheduler(service: &Arc<RecordingComplianceService>) -> ComplianceScheduler {
        ComplianceScheduler::new(service.clone(), SchedulerConfig::default())
    }

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval(JobKind::Retention), Duration::from_secs(86_400));
        assert_eq!(config.interval(JobKind::Erasure), Duration::from_secs(21_600));
        assert_eq!(config.interval(JobKind::Integrity), Duration::from_secs(604_800));
        assert_eq!(config.interval(JobKind::AuditCleanup), Duration::from_secs(2_592_000));
        assert_eq!(config.job_timeout, Duration::from_secs(1_800));
        assert!(config.runs_on_start(JobKind::Retention));
        assert!(!config.runs_on_start(JobKind::Erasure));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = SchedulerConfig::from_lookup(&lookup_from(&[
            ("DEPOT_ERASURE_INTERVAL_SECS", "60"),
            ("DEPOT_RETENTION_ON_START", "false"),
        ]));
        assert_eq!(config.erasure_interval, Duration::from_secs(60));
        assert!(!config.runs_on_start(JobKind::Retention));

        let config = SchedulerConfig::from_lookup(&lookup_from(&[("DEPOT_JOB_TIMEOUT_SECS", "0")]));
        assert!(config.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_stop_twice() {
        let service = Arc::new(RecordingComplianceService::new());
        let scheduler = scheduler(&service);

        assert_eq!(scheduler.stop().await, Err(SchedulerError::NotRunning));
        assert_eq!(scheduler.start().await, Ok(()));
        assert_eq!(scheduler.start().await, Err(SchedulerError::AlreadyRunning));
        assert_eq!(scheduler.active_loops(), 4);

        assert_eq!(scheduler.stop().await, Ok(()));
        assert_eq!(scheduler.active_loops(), 0);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.stop().await, Err(SchedulerError::NotRunning));

        // Restart after a clean stop is allowed.
        assert_eq!(scheduler.start().await, Ok(()));
        assert_eq!(scheduler.stop().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_runs_immediately_others_wait() {
        let service = Arc::new(RecordingComplianceService::new());
        let scheduler = scheduler(&service);
        scheduler.start().await.expect("start");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(service.calls(JobKind::Retention), 1);
        assert_eq!(service.calls(JobKind::Erasure), 0);

        tokio::time::sleep(Duration::from_secs(6 * 3600)).await;
        assert_eq!(service.calls(JobKind::Erasure), 1);
        assert_eq!(service.calls(JobKind::Integrity), 0);

        scheduler.stop().await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_ticking_and_isolated() {
        let service = Arc::new(RecordingComplianceService::new());
        service.fail(JobKind::Retention, true);
        let config = SchedulerConfig {
            retention_interval: Duration::from_secs(60),
            erasure_interval: Duration::from_secs(60),
            ..SchedulerConfig::default()
        };
        let scheduler = ComplianceScheduler::new(service.clone(), config);
        scheduler.start().await.expect("start");

        // t=0 retention, t=60 both, t=120 both
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(service.calls(JobKind::Retention), 3);
        assert_eq!(service.calls(JobKind::Erasure), 2);

        let status = scheduler.status();
        let retention = &status.jobs[0];
        assert_eq!(retention.job, JobKind::Retention);
        assert_eq!(retention.failures, 3);
        assert!(matches!(retention.last_outcome, Some(JobOutcome::Failed { .. })));
        let erasure = &status.jobs[1];
        assert_eq!(erasure.failures, 0);
        assert!(erasure.last_outcome.as_ref().is_some_and(JobOutcome::is_success));

        scheduler.stop().await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_job_times_out() {
        let service = Arc::new(RecordingComplianceService::new());
        service.hang(JobKind::Retention, Duration::from_secs(3600));
        let scheduler = scheduler(&service);
        scheduler.start().await.expect("start");

        let outcome = scheduler
            .trigger_job(JobKind::Retention)
            .expect("running")
            .await
            .expect("join");
        assert_eq!(outcome, JobOutcome::TimedOut { after_secs: 1800 });

        scheduler.stop().await.expect("stop");
        assert_eq!(scheduler.active_loops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_requires_running_scheduler() {
        let service = Arc::new(RecordingComplianceService::new());
        let scheduler = scheduler(&service);
        assert!(matches!(
            scheduler.trigger_job(JobKind::Integrity),
            Err(SchedulerError::NotRunning)
        ));

        scheduler.start().await.expect("start");
        let outcome = scheduler
            .trigger_job(JobKind::Integrity)
            .expect("running")
            .await
            .expect("join");
        assert!(outcome.is_success());
        assert_eq!(service.calls(JobKind::Integrity), 1);
        scheduler.stop().await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_carry_background_context() {
        let service = Arc::new(RecordingComplianceService::new());
        let scheduler = scheduler(&service);
        scheduler.start().await.expect("start");

        scheduler
            .trigger_job(JobKind::AuditCleanup)
            .expect("running")
            .await
            .expect("join");
        assert!(service
            .origins()
            .contains(&WorkOrigin::Job(JobKind::AuditCleanup)));
        assert_eq!(
            service.last_audit_retention(),
            Some(Duration::from_secs(DEFAULT_AUDIT_RETENTION_SECS))
        );
        scheduler.stop().await.expect("stop");
    }
}
