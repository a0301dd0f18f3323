//! Queue Service
//!
//! Worker-facing lease operations. Enqueueing is internal to the
//! dispatcher.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::domain::pipeline::QUEUE_PREFIX;
use canopy_core::dto::queue::Lease;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::repository::WorkQueue;

pub struct QueueService {
    queue: Arc<dyn WorkQueue>,
    lease_duration: Duration,
}

impl QueueService {
    pub fn new(queue: Arc<dyn WorkQueue>, lease_duration: Duration) -> Self {
        Self {
            queue,
            lease_duration,
        }
    }

    /// Leases the next visible unit of `queue_name`, if any
    pub async fn lease(&self, queue_name: &str, worker_id: &str) -> ServiceResult<Option<Lease>> {
        if !queue_name.starts_with(QUEUE_PREFIX) {
            return Err(ServiceError::InvalidRequest(format!(
                "'{}' is not a pipeline queue",
                queue_name
            )));
        }

        let lease = self
            .queue
            .lease(queue_name, worker_id, self.lease_duration)
            .await?;

        if let Some(lease) = &lease {
            tracing::debug!(
                "Worker {} leased unit {} of job {} (attempt {})",
                worker_id,
                lease.unit.id,
                lease.unit.job_id,
                lease.unit.attempt()
            );
        }
        Ok(lease)
    }

    pub async fn ack(&self, lease_id: Uuid) -> ServiceResult<()> {
        self.queue.ack(lease_id).await?;
        Ok(())
    }

    /// Returns a unit to its queue, visible again after `delay`
    pub async fn nack(&self, lease_id: Uuid, delay: Duration) -> ServiceResult<()> {
        self.queue.nack(lease_id, delay).await?;
        tracing::debug!("Lease {} released, redelivery in {:?}", lease_id, delay);
        Ok(())
    }
}
