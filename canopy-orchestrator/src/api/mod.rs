//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain; every route is
//! mounted under `/api`.

pub mod error;
pub mod image;
pub mod job;
pub mod queue;
pub mod registry;

use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Job endpoints
        .route("/job", post(job::create_job))
        .route("/job/list", get(job::list_jobs))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/cancel", post(job::cancel_job))
        .route("/job/{id}/detections", get(job::job_detections))
        .route("/job/{id}/units/{unit_id}/start", post(job::start_unit))
        .route("/job/{id}/units/{unit_id}/outcome", post(job::report_outcome))
        // Pipeline endpoints
        .route("/pipeline", post(registry::create_pipeline))
        .route("/pipeline/list", get(registry::list_pipelines))
        .route("/pipeline/name/{name}", get(registry::get_pipeline))
        .route("/pipeline/name/{name}/service", get(registry::select_service))
        // Backend endpoints
        .route("/backend", post(registry::create_backend))
        .route("/backend/list", get(registry::list_backends))
        .route(
            "/backend/{id}/pipelines/{pipeline_id}",
            post(registry::link_backend),
        )
        // Processing service endpoints
        .route("/service", post(registry::register_service))
        .route("/service/list", get(registry::list_services))
        .route("/service/{id}/endpoint", put(registry::set_endpoint))
        .route("/service/{id}/probe", post(registry::probe_service))
        .route("/service/{id}/sync", post(registry::sync_service))
        // Image endpoints
        .route("/image", post(image::register_images))
        .route("/collection", post(image::create_collection))
        // Queue endpoints
        .route("/queue/{queue_name}/lease", post(queue::lease_unit))
        .route("/lease/{lease_id}/ack", post(queue::ack))
        .route("/lease/{lease_id}/nack", post(queue::nack));

    Router::new()
        .nest("/api", api)
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OrchestratorConfig, StoreKind};
    use crate::repository::MemoryStore;
    use crate::state::Store;
    use axum::body::Body;
    use axum::http::{Request, header};
    use canopy_core::domain::job::{Job, JobStatus};
    use canopy_core::domain::pipeline::Pipeline;
    use canopy_core::domain::unit::SourceImage;
    use canopy_core::dto::queue::Lease;
    use serde::de::DeserializeOwned;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = OrchestratorConfig {
            store: StoreKind::Memory,
            preflight: false,
            ..OrchestratorConfig::default()
        };
        create_router(AppState::new(Store::memory(Arc::new(MemoryStore::new())), &config))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = call(&app(), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_unknown_pipeline_lookup_is_404() {
        let (status, body) = call(&app(), "GET", "/api/pipeline/name/foo-bar", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = parse(&body);
        assert!(body["error"].as_str().unwrap().contains("foo-bar"));
    }

    #[tokio::test]
    async fn test_job_flow_over_http() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/api/pipeline",
            Some(json!({ "name": "detector", "description": null })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let pipeline: Pipeline = parse(&body);
        assert_eq!(pipeline.queue_name, "ml-pipeline-detector");

        let (_, body) = call(
            &app,
            "POST",
            "/api/image",
            Some(json!({ "urls": ["https://images.example/1.jpg"] })),
        )
        .await;
        let images: Vec<SourceImage> = parse(&body);

        let (status, body) = call(
            &app,
            "POST",
            "/api/job",
            Some(json!({ "pipeline": "detector", "target": { "images": [images[0].id] } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let job: Job = parse(&body);
        assert_eq!(job.status, JobStatus::Queued);

        // No eligible service yet
        let (status, _) = call(&app, "GET", "/api/pipeline/name/detector/service", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let lease_body = Some(json!({ "worker_id": "w1" }));
        let (status, body) = call(
            &app,
            "POST",
            "/api/queue/ml-pipeline-detector/lease",
            lease_body.clone(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let lease: Lease = parse(&body);
        assert_eq!(lease.unit.job_id, job.id);

        let (status, _) = call(
            &app,
            "POST",
            "/api/queue/ml-pipeline-detector/lease",
            lease_body,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, "POST", &format!("/api/job/{}/cancel", job.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Job>(&body).status, JobStatus::Cancelled);

        let (status, _) = call(&app, "POST", &format!("/api/job/{}/cancel", job.id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, "GET", "/api/job/list?status=CANCELLED", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Vec<Job>>(&body).len(), 1);

        let (status, _) = call(&app, "POST", &format!("/api/lease/{}/ack", lease.lease_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
