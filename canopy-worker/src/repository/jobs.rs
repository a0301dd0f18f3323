//! Jobs repository
//!
//! Reports unit lifecycle events for the job a unit belongs to:
//! - Marking a unit started (returns the job, so terminal jobs can be seen)
//! - Reporting the unit outcome to the reconciler

use std::sync::Arc;

use async_trait::async_trait;
use canopy_client::{OrchestratorClient, Result};
use canopy_core::domain::job::Job;
use canopy_core::domain::unit::UnitReport;
use canopy_core::dto::job::ApplyOutcome;
use uuid::Uuid;

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Marks a unit started and returns the job as it is now
    async fn start_unit(&self, job_id: Uuid, unit_id: Uuid) -> Result<Job>;

    /// Hands a unit outcome to the reconciler
    async fn report_outcome(&self, report: &UnitReport) -> Result<ApplyOutcome>;
}

/// HTTP implementation of JobRepository
pub struct HttpJobRepository {
    client: Arc<OrchestratorClient>,
}

impl HttpJobRepository {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn start_unit(&self, job_id: Uuid, unit_id: Uuid) -> Result<Job> {
        self.client.start_unit(job_id, unit_id).await
    }

    async fn report_outcome(&self, report: &UnitReport) -> Result<ApplyOutcome> {
        self.client.report_outcome(report).await
    }
}
