//! Source image and collection API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use canopy_core::domain::unit::SourceImage;
use canopy_core::dto::image::{Collection, CreateCollection, RegisterImages};

impl OrchestratorClient {
    /// Register images so jobs can target them; returns them with their ids
    pub async fn register_images(&self, urls: Vec<String>) -> Result<Vec<SourceImage>> {
        let response = self
            .client
            .post(self.url("/image"))
            .json(&RegisterImages { urls })
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn create_collection(&self, req: CreateCollection) -> Result<Collection> {
        let response = self
            .client
            .post(self.url("/collection"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
