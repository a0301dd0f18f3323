//! Queue lease API endpoints

use std::time::Duration;

use crate::OrchestratorClient;
use crate::error::Result;
use canopy_core::dto::queue::{Lease, LeaseRequest, NackRequest};
use uuid::Uuid;

impl OrchestratorClient {
    /// Lease the next visible unit of a queue
    ///
    /// Returns `None` when the queue has nothing visible right now.
    pub async fn lease_unit(&self, queue_name: &str, worker_id: &str) -> Result<Option<Lease>> {
        let url = self.url(&format!("/queue/{}/lease", queue_name));
        let response = self
            .client
            .post(&url)
            .json(&LeaseRequest {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        self.handle_optional_response(response).await
    }

    /// Remove a leased unit from its queue for good
    pub async fn ack(&self, lease_id: Uuid) -> Result<()> {
        let url = self.url(&format!("/lease/{}/ack", lease_id));
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Return a leased unit to its queue, visible again after `delay`
    pub async fn nack(&self, lease_id: Uuid, delay: Duration) -> Result<()> {
        let url = self.url(&format!("/lease/{}/nack", lease_id));
        let response = self
            .client
            .post(&url)
            .json(&NackRequest {
                delay_ms: delay.as_millis() as u64,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
