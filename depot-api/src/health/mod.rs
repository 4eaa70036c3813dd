//! Service health and readiness.

mod checker;

pub use checker::{
    overall_status, ComponentHealth, HealthChecker, HealthReport, ReadinessCheck, ReadinessReport,
};
