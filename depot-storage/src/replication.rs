//! Per-replica liveness tracking and quorum counting.
//!
//! Each storage node moves `Unknown -> Healthy <-> Unhealthy`. A node turns
//! unhealthy after `failure_threshold` consecutive failed probes and healthy
//! again on the next success. "Quorum" here is a local threshold count over
//! this tracker's own probe results, nothing more.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use depot_core::{HealthStatus, NodeHealth, NodeId, NodeState};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::traits::NodeProber;

/// Consecutive failures before a node is marked unhealthy.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Minimum healthy replicas for the data to count as durable.
pub const DEFAULT_MIN_QUORUM: usize = 2;

/// Replication health from a healthy/total count.
///
/// Fewer than `min_quorum` healthy nodes is unhealthy regardless of cluster
/// size. At or above the floor but short of every node is degraded.
pub fn quorum_status(healthy: usize, total: usize, min_quorum: usize) -> HealthStatus {
    if healthy < min_quorum {
        HealthStatus::Unhealthy
    } else if healthy < total {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Point-in-time view of every tracked node.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationSnapshot {
    pub status: HealthStatus,
    pub healthy_nodes: usize,
    pub total_nodes: usize,
    pub min_quorum: usize,
    pub nodes: Vec<NodeHealth>,
}

/// Tracks health for every registered storage node.
#[derive(Debug)]
pub struct ReplicationHealthTracker {
    nodes: RwLock<HashMap<NodeId, NodeHealth>>,
    failure_threshold: u32,
    min_quorum: usize,
}

impl ReplicationHealthTracker {
    pub fn new(failure_threshold: u32, min_quorum: usize) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            min_quorum,
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn min_quorum(&self) -> usize {
        self.min_quorum
    }

    /// Start tracking a node in the `Unknown` state. Returns `false` if the
    /// node was already tracked; its history is kept.
    pub fn register_node(&self, node_id: impl Into<NodeId>) -> bool {
        let node_id = node_id.into();
        let mut nodes = self.write();
        if nodes.contains_key(&node_id) {
            return false;
        }
        tracing::info!(node = %node_id, "Registered storage node");
        nodes.insert(node_id.clone(), NodeHealth::unknown(node_id));
        true
    }

    /// Stop tracking a node. This is the only way an entry is removed.
    pub fn decommission_node(&self, node_id: &str) -> bool {
        let removed = self.write().remove(node_id).is_some();
        if removed {
            tracing::info!(node = %node_id, "Decommissioned storage node");
        }
        removed
    }

    /// A successful probe clears the failure streak and marks the node
    /// healthy. Unregistered nodes are ignored.
    pub fn record_success(&self, node_id: &str) -> bool {
        let mut nodes = self.write();
        let Some(node) = nodes.get_mut(node_id) else {
            return false;
        };
        if node.state == NodeState::Unhealthy {
            tracing::info!(node = %node_id, "Storage node recovered");
        }
        node.state = NodeState::Healthy;
        node.is_healthy = true;
        node.failure_count = 0;
        node.last_check = Some(Utc::now());
        node.last_error = None;
        true
    }

    /// A failed probe extends the streak; at the threshold the node is marked
    /// unhealthy. Unregistered nodes are ignored.
    pub fn record_failure(&self, node_id: &str, error: impl Into<String>) -> bool {
        let threshold = self.failure_threshold;
        let mut nodes = self.write();
        let Some(node) = nodes.get_mut(node_id) else {
            return false;
        };
        node.failure_count = node.failure_count.saturating_add(1);
        node.last_check = Some(Utc::now());
        node.last_error = Some(error.into());

        if node.failure_count >= threshold && node.state != NodeState::Unhealthy {
            tracing::warn!(
                node = %node_id,
                failures = node.failure_count,
                error = ?node.last_error,
                "Storage node marked unhealthy"
            );
            node.state = NodeState::Unhealthy;
            node.is_healthy = false;
        }
        true
    }

    pub fn node_health(&self, node_id: &str) -> Option<NodeHealth> {
        self.read().get(node_id).cloned()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn total_count(&self) -> usize {
        self.read().len()
    }

    pub fn healthy_count(&self) -> usize {
        self.read().values().filter(|n| n.is_healthy).count()
    }

    pub fn replication_status(&self) -> HealthStatus {
        let nodes = self.read();
        let healthy = nodes.values().filter(|n| n.is_healthy).count();
        quorum_status(healthy, nodes.len(), self.min_quorum)
    }

    /// Consistent copy of every node, sorted by id.
    pub fn snapshot(&self) -> ReplicationSnapshot {
        let mut list: Vec<NodeHealth> = self.read().values().cloned().collect();
        list.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        let healthy = list.iter().filter(|n| n.is_healthy).count();
        let total = list.len();
        ReplicationSnapshot {
            status: quorum_status(healthy, total, self.min_quorum),
            healthy_nodes: healthy,
            total_nodes: total,
            min_quorum: self.min_quorum,
            nodes: list,
        }
    }

    /// Probe every registered node concurrently and record the results.
    ///
    /// The node list is copied first; no lock is held while probes run.
    pub async fn probe_all(&self, prober: &dyn NodeProber, timeout: Duration) {
        let ids = self.node_ids();
        let probes = ids.iter().map(|id| async move {
            let outcome = match tokio::time::timeout(timeout, prober.probe(id)).await {
                Ok(result) => result,
                Err(_) => Err(format!("probe timed out after {:?}", timeout)),
            };
            (id, outcome)
        });

        for (id, outcome) in join_all(probes).await {
            match outcome {
                Ok(()) => self.record_success(id),
                Err(e) => {
                    tracing::debug!(node = %id, error = %e, "Storage node probe failed");
                    self.record_failure(id, e)
                }
            };
        }
    }

    /// Probe all nodes every `interval` until `shutdown` flips to `true`.
    pub fn spawn_probe_loop(
        self: &Arc<Self>,
        prober: Arc<dyn NodeProber>,
        interval: Duration,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = interval.as_secs(),
                nodes = tracker.total_count(),
                "Storage node prober started"
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Storage node prober shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tracker.probe_all(prober.as_ref(), timeout).await;
                    }
                }
            }
        })
    }

    // Probe results are whole-value overwrites, so a poisoned map is still
    // usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<NodeId, NodeHealth>> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<NodeId, NodeHealth>> {
        self.nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ReplicationHealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_MIN_QUORUM)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    #[test]
    fn test_quorum_table() {
        for total in 0..=5usize {
            for healthy in 0..=5usize {
                let expected = if healthy < 2 {
                    HealthStatus::Unhealthy
                } else if healthy < total {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                assert_eq!(
                    quorum_status(healthy, total, DEFAULT_MIN_QUORUM),
                    expected,
                    "healthy={} total={}",
                    healthy,
                    total
                );
            }
        }
    }

    #[test]
    fn test_quorum_boundaries() {
        assert_eq!(quorum_status(2, 2, 2), HealthStatus::Healthy);
        assert_eq!(quorum_status(1, 2, 2), HealthStatus::Unhealthy);
        assert_eq!(quorum_status(1, 5, 2), HealthStatus::Unhealthy);
        assert_eq!(quorum_status(3, 5, 2), HealthStatus::Degraded);
        assert_eq!(quorum_status(5, 5, 2), HealthStatus::Healthy);
        // The floor is configurable.
        assert_eq!(quorum_status(1, 1, 1), HealthStatus::Healthy);
    }

    #[test]
    fn test_state_machine() {
        let tracker = ReplicationHealthTracker::new(3, 2);
        assert!(tracker.register_node("a"));
        assert!(!tracker.register_node("a"));
        assert_eq!(tracker.node_health("a").expect("tracked").state, NodeState::Unknown);

        tracker.record_success("a");
        let node = tracker.node_health("a").expect("tracked");
        assert_eq!(node.state, NodeState::Healthy);
        assert!(node.is_healthy);
        assert!(node.last_check.is_some());

        tracker.record_failure("a", "refused");
        tracker.record_failure("a", "refused");
        let node = tracker.node_health("a").expect("tracked");
        assert!(node.is_healthy, "below threshold stays healthy");
        assert_eq!(node.failure_count, 2);

        tracker.record_failure("a", "refused");
        let node = tracker.node_health("a").expect("tracked");
        assert_eq!(node.state, NodeState::Unhealthy);
        assert!(!node.is_healthy);
        assert_eq!(node.last_error.as_deref(), Some("refused"));

        // One success is enough to recover.
        tracker.record_success("a");
        let node = tracker.node_health("a").expect("tracked");
        assert!(node.is_healthy);
        assert_eq!(node.failure_count, 0);
        assert!(node.last_error.is_none());
    }

    #[test]
    fn test_unknown_node_failing_goes_unhealthy() {
        let tracker = ReplicationHealthTracker::new(1, 2);
        tracker.register_node("a");
        tracker.record_failure("a", "dns");
        assert_eq!(tracker.node_health("a").expect("tracked").state, NodeState::Unhealthy);
    }

    #[test]
    fn test_unregistered_and_decommissioned_nodes() {
        let tracker = ReplicationHealthTracker::default();
        assert!(!tracker.record_success("ghost"));
        assert!(!tracker.record_failure("ghost", "x"));

        tracker.register_node("a");
        assert!(tracker.decommission_node("a"));
        assert!(!tracker.decommission_node("a"));
        assert!(tracker.node_health("a").is_none());
    }

    #[test]
    fn test_snapshot_counts() {
        let tracker = ReplicationHealthTracker::default();
        for id in ["c", "a", "b"] {
            tracker.register_node(id);
        }
        tracker.record_success("a");
        tracker.record_success("b");

        let snap = tracker.snapshot();
        assert_eq!(snap.total_nodes, 3);
        assert_eq!(snap.healthy_nodes, 2);
        assert_eq!(snap.status, HealthStatus::Degraded);
        let ids: Vec<_> = snap.nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    struct DownSet(HashSet<&'static str>);

    #[async_trait]
    impl NodeProber for DownSet {
        async fn probe(&self, node_id: &str) -> Result<(), String> {
            if self.0.contains(node_id) {
                Err("connection refused".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_probe_all_records_results() {
        let tracker = ReplicationHealthTracker::new(1, 2);
        for id in ["a", "b", "c"] {
            tracker.register_node(id);
        }
        let prober = DownSet(["c"].into_iter().collect());

        tracker.probe_all(&prober, Duration::from_secs(1)).await;

        assert_eq!(tracker.healthy_count(), 2);
        assert_eq!(tracker.replication_status(), HealthStatus::Degraded);
        assert!(!tracker.node_health("c").expect("tracked").is_healthy);
    }

    struct Hanging;

    #[async_trait]
    impl NodeProber for Hanging {
        async fn probe(&self, _node_id: &str) -> Result<(), String> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_failure() {
        let tracker = ReplicationHealthTracker::new(1, 2);
        tracker.register_node("slow");
        tracker.probe_all(&Hanging, Duration::from_secs(2)).await;

        let node = tracker.node_health("slow").expect("tracked");
        assert_eq!(node.state, NodeState::Unhealthy);
        assert!(node.last_error.expect("error").contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_loop_stops_on_shutdown() {
        let tracker = Arc::new(ReplicationHealthTracker::new(1, 1));
        tracker.register_node("a");
        let (tx, rx) = watch::channel(false);
        let handle = tracker.spawn_probe_loop(
            Arc::new(DownSet(HashSet::new())),
            Duration::from_secs(10),
            Duration::from_secs(1),
            rx,
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tracker.replication_status(), HealthStatus::Healthy);

        tx.send(true).expect("send shutdown");
        handle.await.expect("loop exits");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_loop_stops_when_sender_dropped() {
        let tracker = Arc::new(ReplicationHealthTracker::new(1, 1));
        tracker.register_node("a");
        let (tx, rx) = watch::channel(false);
        let handle = tracker.spawn_probe_loop(
            Arc::new(DownSet(HashSet::new())),
            Duration::from_secs(10),
            Duration::from_secs(1),
            rx,
        );

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits without a sender")
            .expect("join");
    }
}
