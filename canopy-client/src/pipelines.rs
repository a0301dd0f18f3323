//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use canopy_core::domain::pipeline::Pipeline;
use canopy_core::dto::registry::{CreatePipeline, ServiceSelection};

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Register a new pipeline
    ///
    /// The orchestrator derives the queue name from the pipeline name.
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<Pipeline> {
        let response = self
            .client
            .post(self.url("/pipeline"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let response = self.client.get(self.url("/pipeline/list")).send().await?;

        self.handle_response(response).await
    }

    /// Resolve a pipeline by name
    ///
    /// Fails with a 404 [`crate::ClientError::ApiError`] if the name is not
    /// registered.
    pub async fn get_pipeline_by_name(&self, name: &str) -> Result<Pipeline> {
        let url = self.url(&format!("/pipeline/name/{}", name));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Pick the processing service the next unit of `name` should go to
    ///
    /// `None` means no eligible service is currently fresh.
    pub async fn select_service(&self, name: &str) -> Result<Option<ServiceSelection>> {
        let url = self.url(&format!("/pipeline/name/{}/service", name));
        let response = self.client.get(&url).send().await?;

        self.handle_optional_response(response).await
    }
}
