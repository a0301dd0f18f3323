//! Registry API Handlers
//!
//! Pipelines, backends and processing services.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use canopy_core::domain::backend::{Backend, ProbeResult};
use canopy_core::domain::pipeline::Pipeline;
use canopy_core::dto::registry::{
    CreateBackend, CreatePipeline, RegisterService, ServiceSummary, SetEndpoint, SyncReport,
};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::state::AppState;

// =============================================================================
// Pipelines
// =============================================================================

/// POST /pipeline
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline: {}", req.name);

    let pipeline = state.registry.create_pipeline(req).await?;
    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /pipeline/list
pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<Json<Vec<Pipeline>>> {
    Ok(Json(state.registry.list_pipelines().await?))
}

/// GET /pipeline/name/{name}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Pipeline>> {
    Ok(Json(state.registry.get_pipeline(&name).await?))
}

/// GET /pipeline/name/{name}/service
/// Best fresh service for the pipeline, or 204 when none is eligible
pub async fn select_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let selection = state.monitor.select_service(&name).await?;

    Ok(match selection {
        Some(selection) => Json(selection).into_response(),
        None => {
            tracing::debug!("No eligible service for pipeline '{}'", name);
            StatusCode::NO_CONTENT.into_response()
        }
    })
}

// =============================================================================
// Backends
// =============================================================================

/// POST /backend
pub async fn create_backend(
    State(state): State<AppState>,
    Json(req): Json<CreateBackend>,
) -> ApiResult<(StatusCode, Json<Backend>)> {
    let backend = state.registry.create_backend(req).await?;
    Ok((StatusCode::CREATED, Json(backend)))
}

/// GET /backend/list
pub async fn list_backends(State(state): State<AppState>) -> ApiResult<Json<Vec<Backend>>> {
    Ok(Json(state.registry.list_backends().await?))
}

/// POST /backend/{id}/pipelines/{pipeline_id}
pub async fn link_backend(
    State(state): State<AppState>,
    Path((backend_id, pipeline_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Backend>> {
    Ok(Json(state.registry.link_backend(backend_id, pipeline_id).await?))
}

// =============================================================================
// Processing Services
// =============================================================================

/// POST /service
pub async fn register_service(
    State(state): State<AppState>,
    Json(req): Json<RegisterService>,
) -> ApiResult<(StatusCode, Json<ServiceSummary>)> {
    let service = state.registry.register_service(req).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

/// GET /service/list
pub async fn list_services(State(state): State<AppState>) -> ApiResult<Json<Vec<ServiceSummary>>> {
    Ok(Json(state.registry.list_services().await?))
}

/// PUT /service/{id}/endpoint
pub async fn set_endpoint(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetEndpoint>,
) -> ApiResult<Json<ServiceSummary>> {
    Ok(Json(state.registry.set_endpoint(id, req).await?))
}

/// POST /service/{id}/probe
pub async fn probe_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProbeResult>> {
    Ok(Json(state.monitor.probe_now(id).await?))
}

/// POST /service/{id}/sync
pub async fn sync_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SyncReport>> {
    Ok(Json(state.registry.sync_service(id).await?))
}
