//! Job Service
//!
//! Reads, cancellation and unit start notifications for jobs, plus the
//! per-job lock every job mutation goes through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use canopy_core::domain::job::Job;
use canopy_core::dto::job::JobFilter;
use canopy_core::dto::processing::Detection;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::repository::JobRepository;

/// Serialises mutations of a single job
///
/// Dispatch, unit start, reconciliation, cancellation and the watchdog all
/// hold the job's lock across their load-modify-store cycle. Locks live in
/// this process only, so one orchestrator instance owns the job table.
#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `job_id`
    pub async fn lock(&self, job_id: Uuid) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on can go
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks.entry(job_id).or_default().clone()
        };
        slot.lock_owned().await
    }
}

pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    locks: JobLocks,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobRepository>, locks: JobLocks) -> Self {
        Self { jobs, locks }
    }

    /// Get a job by ID
    pub async fn get(&self, id: Uuid) -> ServiceResult<Job> {
        self.jobs
            .find(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("job {}", id)))
    }

    /// List jobs, newest first
    pub async fn list(&self, filter: &JobFilter) -> ServiceResult<Vec<Job>> {
        Ok(self.jobs.list(filter).await?)
    }

    /// Cancel a non-terminal job.
    ///
    /// Takes effect at once: units already in flight keep running, but
    /// workers drop whatever they lease afterwards and late outcomes are
    /// ignored by the reconciler.
    pub async fn cancel(&self, id: Uuid) -> ServiceResult<Job> {
        let _guard = self.locks.lock(id).await;
        let mut job = self.get(id).await?;

        if job.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "job {} is already {}",
                id, job.status
            )));
        }

        job.cancel(Utc::now())?;
        self.jobs.update(&job).await?;

        tracing::info!("Job {} cancelled", id);
        Ok(job)
    }

    /// Notes that a worker began executing one of the job's units.
    ///
    /// A terminal job is returned unchanged so the worker can drop the unit.
    pub async fn start_unit(&self, job_id: Uuid, unit_id: Uuid) -> ServiceResult<Job> {
        let _guard = self.locks.lock(job_id).await;
        let mut job = self.get(job_id).await?;

        if job.is_terminal() {
            tracing::debug!(
                "Unit {} started for job {} which is already {}",
                unit_id,
                job_id,
                job.status
            );
            return Ok(job);
        }

        let was = job.status;
        job.mark_unit_started(Utc::now())?;
        self.jobs.update(&job).await?;

        if was != job.status {
            tracing::info!("Job {} started", job_id);
        }
        Ok(job)
    }

    /// Detections reconciled so far for a job
    pub async fn detections(&self, job_id: Uuid) -> ServiceResult<Vec<Detection>> {
        self.get(job_id).await?;
        Ok(self.jobs.detections(job_id).await?)
    }
}
