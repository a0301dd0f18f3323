//! Units repository
//!
//! Leases units from one pipeline queue and settles each lease with an ack
//! or a nack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canopy_client::{OrchestratorClient, Result};
use canopy_core::dto::queue::Lease;
use uuid::Uuid;

#[async_trait]
pub trait UnitRepository: Send + Sync {
    /// Leases the next visible unit, `None` when the queue is empty
    async fn lease(&self) -> Result<Option<Lease>>;

    /// Removes the unit from the queue
    async fn ack(&self, lease_id: Uuid) -> Result<()>;

    /// Returns the unit to the queue, visible again after `delay`
    async fn nack(&self, lease_id: Uuid, delay: Duration) -> Result<()>;
}

/// HTTP implementation of UnitRepository bound to one queue
pub struct HttpUnitRepository {
    client: Arc<OrchestratorClient>,
    queue_name: String,
    worker_id: String,
}

impl HttpUnitRepository {
    /// # Arguments
    /// * `queue_name` - Queue of the pipeline this worker serves
    /// * `worker_id` - Reported with every lease request
    pub fn new(client: Arc<OrchestratorClient>, queue_name: String, worker_id: String) -> Self {
        Self {
            client,
            queue_name,
            worker_id,
        }
    }
}

#[async_trait]
impl UnitRepository for HttpUnitRepository {
    async fn lease(&self) -> Result<Option<Lease>> {
        self.client.lease_unit(&self.queue_name, &self.worker_id).await
    }

    async fn ack(&self, lease_id: Uuid) -> Result<()> {
        self.client.ack(lease_id).await
    }

    async fn nack(&self, lease_id: Uuid, delay: Duration) -> Result<()> {
        self.client.nack(lease_id, delay).await
    }
}
