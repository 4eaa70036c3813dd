//! Compliance job kinds and run reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of background compliance jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Enforce data retention policies.
    Retention,
    /// Process pending right-to-erasure requests.
    Erasure,
    /// Verify stored data against checksums and replica counts.
    Integrity,
    /// Purge audit entries past their retention window.
    AuditCleanup,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Retention,
        JobKind::Erasure,
        JobKind::Integrity,
        JobKind::AuditCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Retention => "retention",
            JobKind::Erasure => "erasure",
            JobKind::Integrity => "integrity",
            JobKind::AuditCleanup => "audit_cleanup",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsing only happens at the operator boundary; everything inside works
/// with the enum.
impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retention" => Ok(JobKind::Retention),
            "erasure" => Ok(JobKind::Erasure),
            "integrity" => Ok(JobKind::Integrity),
            "audit_cleanup" | "audit-cleanup" | "audit" => Ok(JobKind::AuditCleanup),
            other => Err(format!("unknown compliance job: {}", other)),
        }
    }
}

/// What one compliance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Rows, objects or requests touched by the pass.
    pub affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobReport {
    pub fn affected(count: u64) -> Self {
        Self {
            affected: count,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
