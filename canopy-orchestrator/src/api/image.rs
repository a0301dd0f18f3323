//! Image API Handlers

use axum::{Json, extract::State, http::StatusCode};
use canopy_core::domain::unit::SourceImage;
use canopy_core::dto::image::{Collection, CreateCollection, RegisterImages};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /image
/// Register source images by URL
pub async fn register_images(
    State(state): State<AppState>,
    Json(req): Json<RegisterImages>,
) -> ApiResult<(StatusCode, Json<Vec<SourceImage>>)> {
    if let Some(blank) = req.urls.iter().position(|url| url.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!("url #{} is empty", blank)));
    }

    let images = state.images.register(req.urls).await?;
    tracing::info!("Registered {} source image(s)", images.len());
    Ok((StatusCode::CREATED, Json(images)))
}

/// POST /collection
pub async fn create_collection(
    State(state): State<AppState>,
    Json(req): Json<CreateCollection>,
) -> ApiResult<(StatusCode, Json<Collection>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Collection name cannot be empty".to_string()));
    }

    let collection = state.images.create_collection(req).await?;
    tracing::info!(
        "Collection created: {} with {} image(s)",
        collection.name,
        collection.images.len()
    );
    Ok((StatusCode::CREATED, Json(collection)))
}
