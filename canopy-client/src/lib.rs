//! Canopy HTTP Client
//!
//! Type-safe HTTP clients for the two remote parties of the system:
//! - [`OrchestratorClient`] talks to the Canopy orchestrator API and is shared
//!   by the CLI and the workers.
//! - [`ProcessingServiceClient`] talks to remote processing services
//!   (`/livez`, `/info`, `/process`) and is used by the liveness monitor and
//!   the workers.
//!
//! # Example
//!
//! ```no_run
//! use canopy_client::OrchestratorClient;
//! use canopy_core::dto::registry::CreatePipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let pipeline = client.create_pipeline(CreatePipeline {
//!         name: "moth-detector".to_string(),
//!         description: None,
//!     }).await?;
//!
//!     println!("Created pipeline: {} (queue {})", pipeline.id, pipeline.queue_name);
//!     Ok(())
//! }
//! ```

pub mod error;
mod images;
mod jobs;
mod pipelines;
pub mod processing;
mod queue;
mod services;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use processing::ProcessingServiceClient;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

/// HTTP client for the Canopy orchestrator API
///
/// Methods are grouped by resource:
/// - Jobs (create, list, get, cancel, unit start and outcome reports)
/// - Registry (pipelines, backends, processing services)
/// - Queue leases (lease, ack, nack)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use canopy_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = error_for_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Like [`Self::handle_response`], but `204 No Content` maps to `None`
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        error_for_status(response).await.map(|_| ())
    }
}

/// Turns a non-2xx response into [`ClientError::ApiError`] carrying the body
pub(crate) async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(response)
}
