//! Backend and processing service API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use canopy_core::domain::backend::{Backend, ProbeResult};
use canopy_core::dto::registry::{
    CreateBackend, RegisterService, ServiceSummary, SetEndpoint, SyncReport,
};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Backends
    // =============================================================================

    pub async fn create_backend(&self, req: CreateBackend) -> Result<Backend> {
        let response = self
            .client
            .post(self.url("/backend"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_backends(&self) -> Result<Vec<Backend>> {
        let response = self.client.get(self.url("/backend/list")).send().await?;

        self.handle_response(response).await
    }

    /// Declare that a backend can run a pipeline
    pub async fn link_backend(&self, backend_id: Uuid, pipeline_id: Uuid) -> Result<Backend> {
        let url = self.url(&format!("/backend/{}/pipelines/{}", backend_id, pipeline_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Processing Services
    // =============================================================================

    pub async fn register_service(&self, req: RegisterService) -> Result<ServiceSummary> {
        let response = self
            .client
            .post(self.url("/service"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List services with their derived online/offline status
    pub async fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        let response = self.client.get(self.url("/service/list")).send().await?;

        self.handle_response(response).await
    }

    /// Assign a new endpoint, or clear it with `None`
    pub async fn set_endpoint(
        &self,
        service_id: Uuid,
        endpoint_url: Option<String>,
    ) -> Result<ServiceSummary> {
        let url = self.url(&format!("/service/{}/endpoint", service_id));
        let response = self
            .client
            .put(&url)
            .json(&SetEndpoint { endpoint_url })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Probe a service right away instead of waiting for the next cycle
    pub async fn probe_service(&self, service_id: Uuid) -> Result<ProbeResult> {
        let url = self.url(&format!("/service/{}/probe", service_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Import the pipelines a service advertises on its `/info` endpoint
    pub async fn sync_service(&self, service_id: Uuid) -> Result<SyncReport> {
        let url = self.url(&format!("/service/{}/sync", service_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
