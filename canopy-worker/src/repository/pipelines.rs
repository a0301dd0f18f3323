//! Pipelines repository
//!
//! Registry lookups: resolving the worker's pipeline at boot and asking the
//! liveness monitor for a service before each inference call.

use std::sync::Arc;

use async_trait::async_trait;
use canopy_client::{OrchestratorClient, Result};
use canopy_core::domain::pipeline::Pipeline;
use canopy_core::dto::registry::ServiceSelection;

#[async_trait]
pub trait PipelineRepository: Send + Sync {
    /// Looks a pipeline up by name; 404 when it is not registered
    async fn resolve(&self, name: &str) -> Result<Pipeline>;

    /// Lowest-latency fresh service for the pipeline, if any
    async fn select_service(&self, name: &str) -> Result<Option<ServiceSelection>>;
}

/// HTTP implementation of PipelineRepository
pub struct HttpPipelineRepository {
    client: Arc<OrchestratorClient>,
}

impl HttpPipelineRepository {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineRepository for HttpPipelineRepository {
    async fn resolve(&self, name: &str) -> Result<Pipeline> {
        self.client.get_pipeline_by_name(name).await
    }

    async fn select_service(&self, name: &str) -> Result<Option<ServiceSelection>> {
        self.client.select_service(name).await
    }
}
