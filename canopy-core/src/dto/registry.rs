//! Registry DTOs
//!
//! Administrative requests for pipelines, backends and processing services,
//! plus the summaries returned to operators and workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::backend::{ProcessingService, ServiceStatus};

/// Request to register a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    pub description: Option<String>,
}

/// Request to create a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBackend {
    pub name: String,
}

/// Request to register a processing service under a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterService {
    pub name: String,
    pub backend_id: Uuid,
    pub endpoint_url: Option<String>,
}

/// Request to assign or clear a service endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetEndpoint {
    pub endpoint_url: Option<String>,
}

/// Service chosen to run a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSelection {
    pub service_id: Uuid,
    pub endpoint_url: String,
    pub latency: Option<Duration>,
}

/// Processing service with its derived status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: Uuid,
    pub name: String,
    pub backend_id: Uuid,
    pub endpoint_url: Option<String>,
    pub status: ServiceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_seen_live: Option<DateTime<Utc>>,
    pub last_seen_latency: Option<Duration>,
}

impl ServiceSummary {
    pub fn from_service(service: ProcessingService, now: DateTime<Utc>, threshold: Duration) -> Self {
        Self {
            status: service.status(now, threshold),
            id: service.id,
            name: service.name,
            backend_id: service.backend_id,
            endpoint_url: service.endpoint_url,
            last_seen: service.liveness.last_seen,
            last_seen_live: service.liveness.last_seen_live,
            last_seen_latency: service.liveness.last_seen_latency,
        }
    }
}

/// Result of synchronising pipelines from a service's `/info`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub linked: Vec<String>,
    pub unchanged: Vec<String>,
}
