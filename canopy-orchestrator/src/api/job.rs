//! Job API Handlers
//!
//! HTTP endpoints for job lifecycle management.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use canopy_core::domain::job::Job;
use canopy_core::domain::unit::UnitReport;
use canopy_core::dto::job::{ApplyOutcome, CreateJob, JobFilter};
use canopy_core::dto::processing::Detection;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /job
/// Create a job and dispatch its units
///
/// Dispatch problems that belong to the job (unknown pipeline, empty target,
/// partial enqueue) still answer 201; they show in the job's status.
/// Dispatch runs on its own task and finishes even if the client disconnects.
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    tracing::info!("Creating job for pipeline: {}", req.pipeline);

    let job = state
        .dispatcher
        .spawn(req)
        .await
        .map_err(|e| ApiError::InternalError(format!("dispatch task failed: {}", e)))??;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /job/{id}
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(state.jobs.get(id).await?))
}

/// GET /job/list
/// List jobs, newest first
///
/// Query parameters:
/// - `status` (optional): e.g. `STARTED`
/// - `pipeline` (optional): pipeline name
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing jobs: {:?}", filter);

    Ok(Json(state.jobs.list(&filter).await?))
}

/// POST /job/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.cancel(id).await?))
}

/// GET /job/{id}/detections
pub async fn job_detections(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Detection>>> {
    Ok(Json(state.jobs.detections(id).await?))
}

// =============================================================================
// Unit Endpoints (called by workers)
// =============================================================================

/// POST /job/{id}/units/{unit_id}/start
/// Returns the job; a terminal status tells the worker to drop the unit
pub async fn start_unit(
    State(state): State<AppState>,
    Path((job_id, unit_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.start_unit(job_id, unit_id).await?))
}

/// POST /job/{id}/units/{unit_id}/outcome
pub async fn report_outcome(
    State(state): State<AppState>,
    Path((job_id, unit_id)): Path<(Uuid, Uuid)>,
    Json(report): Json<UnitReport>,
) -> ApiResult<Json<ApplyOutcome>> {
    if report.unit_id != unit_id {
        return Err(ApiError::BadRequest(format!(
            "report is for unit {}, not {}",
            report.unit_id, unit_id
        )));
    }

    Ok(Json(state.reconciler.apply(job_id, report).await?))
}
