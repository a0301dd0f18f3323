//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use canopy_core::domain::job::Job;
use canopy_core::domain::unit::UnitReport;
use canopy_core::dto::job::{ApplyOutcome, CreateJob, JobFilter};
use canopy_core::dto::processing::Detection;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Create a job and dispatch its units
    ///
    /// The returned job is already past dispatch: `QUEUED` when every unit
    /// was enqueued, `FAILURE` with an error detail otherwise.
    ///
    /// # Example
    /// ```no_run
    /// # use canopy_client::OrchestratorClient;
    /// # use canopy_core::dto::job::CreateJob;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let job = client.create_job(CreateJob {
    ///     pipeline: "moth-detector".to_string(),
    ///     target: Default::default(),
    /// }).await?;
    /// println!("{} is {}", job.id, job.status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_job(&self, req: CreateJob) -> Result<Job> {
        let response = self.client.post(self.url("/job")).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let url = self.url(&format!("/job/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List jobs, newest first, optionally filtered by status or pipeline
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(status) = filter.status {
            query.push(("status", status.to_string()));
        }
        if let Some(pipeline) = &filter.pipeline {
            query.push(("pipeline", pipeline.clone()));
        }

        let response = self
            .client
            .get(self.url("/job/list"))
            .query(&query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a non-terminal job
    ///
    /// Queued units of a cancelled job are dropped by workers when leased.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job> {
        let url = self.url(&format!("/job/{}/cancel", job_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Detections persisted for a job so far
    pub async fn job_detections(&self, job_id: Uuid) -> Result<Vec<Detection>> {
        let url = self.url(&format!("/job/{}/detections", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Unit Reports (Worker-specific)
    // =============================================================================

    /// Tell the orchestrator a unit began executing
    ///
    /// Returns the job after the update. A terminal job is returned
    /// unchanged so the caller can drop the unit.
    pub async fn start_unit(&self, job_id: Uuid, unit_id: Uuid) -> Result<Job> {
        let url = self.url(&format!("/job/{}/units/{}/start", job_id, unit_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Deliver the final outcome of a unit for reconciliation
    ///
    /// Safe to repeat: a second delivery of the same unit yields
    /// [`ApplyOutcome::Duplicate`].
    pub async fn report_outcome(&self, report: &UnitReport) -> Result<ApplyOutcome> {
        let url = self.url(&format!(
            "/job/{}/units/{}/outcome",
            report.job_id, report.unit_id
        ));
        let response = self.client.post(&url).json(report).send().await?;

        self.handle_response(response).await
    }
}
