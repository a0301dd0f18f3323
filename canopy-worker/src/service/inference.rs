//! Inference service
//!
//! Runs a unit on the processing service the orchestrator selects and folds
//! every failure into the orchestration error taxonomy, so the retry policy
//! can tell transient failures from permanent ones.

use std::sync::Arc;

use async_trait::async_trait;
use canopy_client::{ClientError, ProcessingServiceClient};
use canopy_core::OrchestrationError;
use canopy_core::domain::unit::WorkUnit;
use canopy_core::dto::processing::{PipelineRequest, PipelineResults};
use tracing::debug;

use crate::repository::PipelineRepository;

#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Processes every image of `unit` on one live service
    async fn infer(&self, unit: &WorkUnit) -> Result<PipelineResults, OrchestrationError>;
}

/// Calls `POST {endpoint}/process` on the service picked by the liveness monitor
pub struct RemoteInferenceService {
    pipelines: Arc<dyn PipelineRepository>,
    client: ProcessingServiceClient,
}

impl RemoteInferenceService {
    pub fn new(pipelines: Arc<dyn PipelineRepository>, client: ProcessingServiceClient) -> Self {
        Self { pipelines, client }
    }
}

#[async_trait]
impl InferenceService for RemoteInferenceService {
    async fn infer(&self, unit: &WorkUnit) -> Result<PipelineResults, OrchestrationError> {
        let selection = self
            .pipelines
            .select_service(&unit.pipeline)
            .await
            .map_err(|e| {
                OrchestrationError::ServiceUnavailable(format!("service selection failed: {}", e))
            })?
            .ok_or_else(|| {
                OrchestrationError::ServiceUnavailable(format!(
                    "no live service for pipeline '{}'",
                    unit.pipeline
                ))
            })?;

        debug!(
            "Unit {} -> service {} at {}",
            unit.id, selection.service_id, selection.endpoint_url
        );

        let request = PipelineRequest {
            pipeline: unit.pipeline.clone(),
            source_images: unit.images.clone(),
            config: None,
        };

        self.client
            .process(&selection.endpoint_url, &request)
            .await
            .map_err(classify)
    }
}

/// Timeouts, connection errors, 5xx and 429 are transient; the rest is not
pub fn classify(err: ClientError) -> OrchestrationError {
    if err.is_transient() {
        OrchestrationError::ServiceUnavailable(err.to_string())
    } else {
        OrchestrationError::RemoteInferenceError {
            status: err.status(),
            message: err.to_string(),
        }
    }
}
