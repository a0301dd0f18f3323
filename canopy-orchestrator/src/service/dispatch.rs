//! Dispatcher
//!
//! Turns a job request into queued work units:
//! resolve pipeline -> expand target -> partition -> pre-flight -> enqueue.

use std::collections::HashSet;
use std::sync::Arc;

use canopy_core::OrchestrationError;
use canopy_core::domain::job::{ErrorDetail, ErrorKind, Job};
use canopy_core::domain::unit::{WorkUnit, partition};
use canopy_core::dto::job::CreateJob;
use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{JobLocks, LivenessMonitor, ServiceResult};
use crate::repository::{ImageRepository, JobRepository, RegistryRepository, WorkQueue};

/// Dispatch settings
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Images per work unit
    pub batch_size: usize,
    /// Probe a service before enqueueing
    pub preflight: bool,
}

pub struct Dispatcher {
    registry: Arc<dyn RegistryRepository>,
    jobs: Arc<dyn JobRepository>,
    queue: Arc<dyn WorkQueue>,
    images: Arc<dyn ImageRepository>,
    monitor: LivenessMonitor,
    locks: JobLocks,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn RegistryRepository>,
        jobs: Arc<dyn JobRepository>,
        queue: Arc<dyn WorkQueue>,
        images: Arc<dyn ImageRepository>,
        monitor: LivenessMonitor,
        locks: JobLocks,
        options: DispatchOptions,
    ) -> Self {
        Self {
            registry,
            jobs,
            queue,
            images,
            monitor,
            locks,
            options,
        }
    }

    /// Runs [`Dispatcher::dispatch`] on its own task.
    ///
    /// Dropping the returned handle detaches the task, so a caller that goes
    /// away mid-dispatch cannot strand the job between states.
    pub fn spawn(self: &Arc<Self>, req: CreateJob) -> JoinHandle<ServiceResult<Job>> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(req).await })
    }

    /// Creates a job and enqueues its units.
    ///
    /// Failures that belong to the job (unknown pipeline, empty target,
    /// partial enqueue) are recorded on the returned job rather than
    /// returned as errors; only storage errors fail the call.
    pub async fn dispatch(&self, req: CreateJob) -> ServiceResult<Job> {
        let mut job = Job::new(req.pipeline, req.target);
        let _guard = self.locks.lock(job.id).await;
        self.jobs.insert(&job).await?;

        tracing::info!("Job created: {} for pipeline: {}", job.id, job.pipeline);

        let Some(pipeline) = self.registry.find_pipeline(&job.pipeline).await? else {
            tracing::warn!("Job {} names unknown pipeline '{}'", job.id, job.pipeline);
            let detail = ErrorDetail::unknown_pipeline(&job.pipeline);
            return self.fail(job, detail).await;
        };

        let images = self.images.expand(&job.target).await?;
        let found: HashSet<Uuid> = images.iter().map(|i| i.id).collect();
        for missing in job.target.images.iter().filter(|id| !found.contains(id)) {
            tracing::warn!("Job {}: dropping unknown image {}", job.id, missing);
        }

        if images.is_empty() {
            let detail = ErrorDetail::new(ErrorKind::EmptyTarget, "target expanded to no images");
            return self.fail(job, detail).await;
        }

        let batches = partition(images, self.options.batch_size);
        let total = batches.len() as u32;

        if self.options.preflight {
            match self.monitor.preflight(&pipeline.name).await {
                Ok(true) => tracing::debug!("Pre-flight ok for pipeline '{}'", pipeline.name),
                Ok(false) => tracing::warn!(
                    "No reachable service for pipeline '{}'; enqueueing job {} anyway",
                    pipeline.name,
                    job.id
                ),
                Err(e) => tracing::warn!("Pre-flight for pipeline '{}' failed: {}", pipeline.name, e),
            }
        }

        job.mark_queued(total, Utc::now())?;
        self.jobs.update(&job).await?;

        for (enqueued, batch) in batches.into_iter().enumerate() {
            let unit = WorkUnit::new(job.id, &pipeline.name, batch);
            if let Err(e) = self.queue.enqueue(&pipeline.queue_name, &unit).await {
                let err = OrchestrationError::DispatchFailure {
                    unenqueued: total - enqueued as u32,
                    total,
                };
                tracing::error!(
                    "Job {}: enqueue to {}: {} ({})",
                    job.id,
                    pipeline.queue_name,
                    err,
                    e
                );
                let detail = ErrorDetail::dispatch_failure(&err, &e.to_string());
                return self.fail(job, detail).await;
            }
        }

        tracing::info!(
            "Job {} queued: {} unit(s) on {}",
            job.id,
            total,
            pipeline.queue_name
        );
        Ok(job)
    }

    /// Moves a `Created` or `Queued` job to `Failure` and stores it
    async fn fail(&self, mut job: Job, detail: ErrorDetail) -> ServiceResult<Job> {
        job.fail(detail, Utc::now())?;
        self.jobs.update(&job).await?;
        tracing::info!(
            "Job {} failed during dispatch: {}",
            job.id,
            job.error_detail.as_ref().map(|d| d.message.as_str()).unwrap_or_default()
        );
        Ok(job)
    }
}
