//! Queue DTOs
//!
//! Workers lease units from a pipeline queue through the orchestrator and
//! settle each lease with an ack or a nack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::unit::WorkUnit;

/// Time-bounded claim on a queued unit
///
/// If neither acked nor nacked before `expires_at`, the unit becomes
/// visible again and is redelivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: Uuid,
    pub queue_name: String,
    pub unit: WorkUnit,
    pub expires_at: DateTime<Utc>,
}

/// Request to lease the next visible unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: String,
}

/// Gives a unit back to the queue for another attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackRequest {
    /// Milliseconds before the unit becomes visible again
    pub delay_ms: u64,
}
