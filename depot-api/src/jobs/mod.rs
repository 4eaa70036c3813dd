//! Background Jobs for the depot API
//!
//! - `compliance`: the four scheduled compliance passes
//!
//! # Usage
//!
//! ```ignore
//! use depot_api::jobs::{ComplianceScheduler, SchedulerConfig};
//!
//! let scheduler = ComplianceScheduler::new(service, SchedulerConfig::from_env());
//! scheduler.start().await?;
//!
//! // On shutdown
//! scheduler.stop().await?;
//! ```

pub mod compliance;

pub use compliance::{
    ComplianceScheduler, JobOutcome, JobStatus, SchedulerConfig, SchedulerStatus,
};
