//! Health types shared by the replication tracker and the health checker.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{NodeId, Timestamp};

/// Health of a component or of the whole service.
///
/// Variants are ordered by severity so `max` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Numeric form for gauges: 0 healthy, 1 degraded, 2 unhealthy.
    pub fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness state of one storage replica: `Unknown -> Healthy <-> Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Registered but never probed.
    Unknown,
    Healthy,
    Unhealthy,
}

/// Tracked health of one storage replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_id: NodeId,
    pub state: NodeState,
    pub is_healthy: bool,
    /// Consecutive failed probes since the last success.
    pub failure_count: u32,
    pub last_check: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl NodeHealth {
    /// A freshly registered node that has not been probed.
    pub fn unknown(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            state: NodeState::Unknown,
            is_healthy: false,
            failure_count: 0,
            last_check: None,
            last_error: None,
        }
    }
}
