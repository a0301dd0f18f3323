//! Queue API Handlers
//!
//! Lease endpoints used by workers.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use canopy_core::dto::queue::{LeaseRequest, NackRequest};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::state::AppState;

/// POST /queue/{queue_name}/lease
/// Leases the next visible unit; 204 when there is none
pub async fn lease_unit(
    State(state): State<AppState>,
    Path(queue_name): Path<String>,
    Json(req): Json<LeaseRequest>,
) -> ApiResult<Response> {
    let lease = state.queue.lease(&queue_name, &req.worker_id).await?;

    Ok(match lease {
        Some(lease) => Json(lease).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// POST /lease/{lease_id}/ack
pub async fn ack(State(state): State<AppState>, Path(lease_id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.queue.ack(lease_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /lease/{lease_id}/nack
pub async fn nack(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    Json(req): Json<NackRequest>,
) -> ApiResult<StatusCode> {
    state
        .queue
        .nack(lease_id, Duration::from_millis(req.delay_ms))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
