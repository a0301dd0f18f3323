//! Processing service client
//!
//! Speaks the processing service protocol:
//! - `GET  /livez`   2xx means live
//! - `GET  /info`    pipelines the service serves
//! - `POST /process` run a pipeline over a batch of source images

use std::time::{Duration, Instant};

use canopy_core::dto::processing::{PipelineRequest, PipelineResults, ServiceInfo};
use reqwest::Client;
use tracing::debug;

use crate::error::{ClientError, Result};

/// HTTP client for remote processing services
///
/// Endpoints are passed per call since a single client talks to every
/// service in the registry.
#[derive(Debug, Clone)]
pub struct ProcessingServiceClient {
    client: Client,
    probe_timeout: Duration,
    process_timeout: Duration,
}

impl ProcessingServiceClient {
    pub fn new(probe_timeout: Duration, process_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            probe_timeout,
            process_timeout,
        }
    }

    /// Calls `/livez` and returns the measured round trip.
    ///
    /// Any non-2xx answer or transport error is an error.
    pub async fn livez(&self, endpoint: &str) -> Result<Duration> {
        let url = join(endpoint, "livez");
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        crate::error_for_status(response).await?;

        let latency = started.elapsed();
        debug!("Probed {} in {:?}", url, latency);
        Ok(latency)
    }

    /// Fetches the service's advertised pipelines
    pub async fn info(&self, endpoint: &str) -> Result<ServiceInfo> {
        let response = self
            .client
            .get(join(endpoint, "info"))
            .timeout(self.probe_timeout)
            .send()
            .await?;
        let response = crate::error_for_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Invalid /info response: {}", e)))
    }

    /// Runs a pipeline over the request's images.
    ///
    /// The response is checked against the request before it is returned.
    pub async fn process(&self, endpoint: &str, request: &PipelineRequest) -> Result<PipelineResults> {
        let response = self
            .client
            .post(join(endpoint, "process"))
            .timeout(self.process_timeout)
            .json(request)
            .send()
            .await?;
        let response = crate::error_for_status(response).await?;

        let results: PipelineResults = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Invalid /process response: {}", e)))?;

        results
            .validate_against(request)
            .map_err(ClientError::ParseError)?;

        Ok(results)
    }
}

fn join(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}
