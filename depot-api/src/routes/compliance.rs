//! Compliance job admin routes.
//!
//! Job names are parsed into [`JobKind`] here and nowhere else. Triggering a
//! job affects every tenant, so it also needs the operator token.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use depot_core::JobKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::jobs::{ComplianceScheduler, SchedulerStatus};
use crate::middleware::{OperatorAuth, TenantExtractor};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub job: JobKind,
    pub accepted: bool,
    /// Request that asked for the run, for correlating with job logs.
    pub request_id: Uuid,
}

/// GET /api/v1/compliance/jobs
pub async fn list_jobs(State(scheduler): State<Arc<ComplianceScheduler>>) -> Json<SchedulerStatus> {
    Json(scheduler.status())
}

/// POST /api/v1/compliance/jobs/:job/trigger
pub async fn trigger_job(
    State(scheduler): State<Arc<ComplianceScheduler>>,
    _operator: OperatorAuth,
    TenantExtractor(ctx): TenantExtractor,
    Path(job): Path<String>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let kind: JobKind = job.parse().map_err(|_| ApiError::job_not_found(&job))?;

    // Runs detached; the outcome lands in the job status.
    let _run = scheduler.trigger_job(kind)?;
    tracing::info!(
        job = %kind,
        request_id = %ctx.request_id(),
        tenant_slug = ctx.tenant_slug().unwrap_or_default(),
        "Compliance job trigger accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            job: kind,
            accepted: true,
            request_id: ctx.request_id(),
        }),
    ))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job/trigger", post(trigger_job))
}
