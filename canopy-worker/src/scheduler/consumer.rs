//! Unit consumer
//!
//! Each loop leases one unit at a time from the worker's queue:
//! lease -> start -> infer -> report -> ack. Failed inference goes through
//! the retry policy, which either nacks the unit with a backoff delay or
//! reports it failed. When a report cannot be delivered the lease is left
//! to expire so the unit is redelivered; reconciliation is idempotent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use canopy_core::domain::unit::{UnitOutcome, UnitReport};
use canopy_core::dto::queue::Lease;
use canopy_core::retry::{RetryDecision, RetryPolicy};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::repository::{JobRepository, UnitRepository};
use crate::service::InferenceService;

/// What happened to a leased unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitDisposition {
    /// Processed and reported successful
    Completed,
    /// Reported failed, either permanently or after the last attempt
    Failed,
    /// Nacked for another attempt
    Retried { delay: Duration },
    /// Its job is already terminal; acked without processing
    Dropped,
    /// The orchestrator could not be told; the lease will expire
    Abandoned,
}

/// Consumes units of one pipeline queue
#[derive(Clone)]
pub struct UnitConsumer {
    units: Arc<dyn UnitRepository>,
    jobs: Arc<dyn JobRepository>,
    inference: Arc<dyn InferenceService>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl UnitConsumer {
    pub fn new(
        units: Arc<dyn UnitRepository>,
        jobs: Arc<dyn JobRepository>,
        inference: Arc<dyn InferenceService>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            units,
            jobs,
            inference,
            retry,
            poll_interval,
        }
    }

    /// Runs `concurrency` consumer loops until one of them stops
    ///
    /// The loops are tasks on the current runtime, so a single-threaded
    /// runtime keeps every inference call on one thread.
    pub async fn run(self, concurrency: usize) -> Result<()> {
        info!(
            "Starting {} consumer loop(s) (poll interval: {:?})",
            concurrency, self.poll_interval
        );

        let mut loops = JoinSet::new();
        for index in 0..concurrency {
            let consumer = self.clone();
            loops.spawn(async move { consumer.consume(index).await });
        }

        match loops.join_next().await {
            Some(Ok(())) | None => Ok(()),
            Some(Err(e)) => Err(e).context("Consumer loop panicked"),
        }
    }

    async fn consume(&self, index: usize) {
        loop {
            match self.poll_once().await {
                Ok(Some(disposition)) => {
                    debug!("Loop {}: unit settled as {:?}", index, disposition);
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    error!("Loop {}: lease failed: {:#}", index, e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Leases and processes at most one unit
    pub async fn poll_once(&self) -> Result<Option<UnitDisposition>> {
        let lease = self.units.lease().await.context("Failed to lease unit")?;

        match lease {
            Some(lease) => Ok(Some(self.process(lease).await)),
            None => Ok(None),
        }
    }

    /// Carries one leased unit to a settled state
    pub async fn process(&self, lease: Lease) -> UnitDisposition {
        let unit = &lease.unit;
        let attempt = unit.attempt();

        let job = match self.jobs.start_unit(unit.job_id, unit.id).await {
            Ok(job) => job,
            Err(e) => {
                warn!("Failed to start unit {} of job {}: {}", unit.id, unit.job_id, e);
                return UnitDisposition::Abandoned;
            }
        };

        if job.is_terminal() {
            debug!(
                "Dropping unit {}: job {} is already {}",
                unit.id, job.id, job.status
            );
            return self.settle(&lease, UnitDisposition::Dropped).await;
        }

        info!(
            "Processing unit {} of job {} ({} image(s), attempt {})",
            unit.id,
            unit.job_id,
            unit.images.len(),
            attempt
        );

        let outcome = match self.inference.infer(unit).await {
            Ok(results) => UnitOutcome::Succeeded { results },
            Err(e) => match self.retry.decide(attempt, &e) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        "Unit {} attempt {}/{} failed, retrying in {:?}: {}",
                        unit.id, attempt, self.retry.max_attempts, delay, e
                    );
                    return match self.units.nack(lease.lease_id, delay).await {
                        Ok(()) => UnitDisposition::Retried { delay },
                        Err(nack_err) => {
                            warn!("Failed to nack unit {}: {}", unit.id, nack_err);
                            UnitDisposition::Abandoned
                        }
                    };
                }
                RetryDecision::GiveUp => {
                    warn!("Unit {} failed on attempt {}: {}", unit.id, attempt, e);
                    UnitOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        };

        let disposition = if outcome.is_success() {
            UnitDisposition::Completed
        } else {
            UnitDisposition::Failed
        };

        let report = UnitReport {
            unit_id: unit.id,
            job_id: unit.job_id,
            attempts: attempt,
            outcome,
        };

        match self.jobs.report_outcome(&report).await {
            Ok(applied) => {
                debug!("Unit {} reconciled: {:?}", unit.id, applied);
                self.settle(&lease, disposition).await
            }
            Err(e) => {
                warn!(
                    "Failed to report unit {}; leaving lease {} to expire: {}",
                    unit.id, lease.lease_id, e
                );
                UnitDisposition::Abandoned
            }
        }
    }

    /// Acks the lease, downgrading to `Abandoned` if the ack is lost
    async fn settle(&self, lease: &Lease, disposition: UnitDisposition) -> UnitDisposition {
        match self.units.ack(lease.lease_id).await {
            Ok(()) => disposition,
            Err(e) => {
                warn!("Failed to ack lease {}: {}", lease.lease_id, e);
                UnitDisposition::Abandoned
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use canopy_client::{ClientError, Result as ClientResult};
    use canopy_core::OrchestrationError;
    use canopy_core::domain::job::{Job, JobStatus, TargetScope};
    use canopy_core::domain::unit::{SourceImage, WorkUnit};
    use canopy_core::dto::job::ApplyOutcome;
    use canopy_core::dto::processing::PipelineResults;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Single-unit queue that redelivers nacked units with a bumped attempt count
    #[derive(Default)]
    struct FakeQueue {
        visible: Mutex<VecDeque<WorkUnit>>,
        leased: Mutex<Vec<(Uuid, WorkUnit)>>,
        acked: Mutex<Vec<Uuid>>,
        nacks: Mutex<Vec<Duration>>,
    }

    impl FakeQueue {
        fn with(unit: WorkUnit) -> Self {
            let queue = Self::default();
            queue.visible.lock().unwrap().push_back(unit);
            queue
        }

        fn acked(&self) -> usize {
            self.acked.lock().unwrap().len()
        }

        fn outstanding(&self) -> usize {
            self.leased.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl UnitRepository for FakeQueue {
        async fn lease(&self) -> ClientResult<Option<Lease>> {
            let Some(unit) = self.visible.lock().unwrap().pop_front() else {
                return Ok(None);
            };
            let lease_id = Uuid::new_v4();
            self.leased.lock().unwrap().push((lease_id, unit.clone()));
            Ok(Some(Lease {
                lease_id,
                queue_name: format!("ml-pipeline-{}", unit.pipeline),
                unit,
                expires_at: Utc::now(),
            }))
        }

        async fn ack(&self, lease_id: Uuid) -> ClientResult<()> {
            let mut leased = self.leased.lock().unwrap();
            let index = leased
                .iter()
                .position(|(id, _)| *id == lease_id)
                .ok_or_else(|| ClientError::api_error(404, "lease not found"))?;
            leased.remove(index);
            self.acked.lock().unwrap().push(lease_id);
            Ok(())
        }

        async fn nack(&self, lease_id: Uuid, delay: Duration) -> ClientResult<()> {
            let mut leased = self.leased.lock().unwrap();
            let index = leased
                .iter()
                .position(|(id, _)| *id == lease_id)
                .ok_or_else(|| ClientError::api_error(404, "lease not found"))?;
            let (_, mut unit) = leased.remove(index);
            unit.attempt_count += 1;
            self.visible.lock().unwrap().push_back(unit);
            self.nacks.lock().unwrap().push(delay);
            Ok(())
        }
    }

    struct FakeJobs {
        status: JobStatus,
        reachable: bool,
        reports: Mutex<Vec<UnitReport>>,
    }

    impl FakeJobs {
        fn with_status(status: JobStatus) -> Self {
            Self {
                status,
                reachable: true,
                reports: Mutex::new(vec![]),
            }
        }

        fn unreachable() -> Self {
            Self {
                reachable: false,
                ..Self::with_status(JobStatus::Started)
            }
        }

        fn reports(&self) -> Vec<UnitReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobRepository for FakeJobs {
        async fn start_unit(&self, job_id: Uuid, _unit_id: Uuid) -> ClientResult<Job> {
            let mut job = Job::new("detector", TargetScope::default());
            job.id = job_id;
            job.status = self.status;
            Ok(job)
        }

        async fn report_outcome(&self, report: &UnitReport) -> ClientResult<ApplyOutcome> {
            if !self.reachable {
                return Err(ClientError::api_error(503, "orchestrator unavailable"));
            }
            self.reports.lock().unwrap().push(report.clone());
            Ok(ApplyOutcome::Applied {
                status: JobStatus::Success,
            })
        }
    }

    /// Answers with a scripted sequence of results, then succeeds
    struct ScriptedInference {
        script: Mutex<VecDeque<OrchestrationError>>,
        calls: Mutex<u32>,
    }

    impl ScriptedInference {
        fn failing(errors: Vec<OrchestrationError>) -> Self {
            Self {
                script: Mutex::new(errors.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl InferenceService for ScriptedInference {
        async fn infer(&self, unit: &WorkUnit) -> std::result::Result<PipelineResults, OrchestrationError> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(PipelineResults {
                    pipeline: unit.pipeline.clone(),
                    source_images: unit.images.clone(),
                    detections: vec![],
                    total_time: 0.5,
                }),
            }
        }
    }

    fn unit() -> WorkUnit {
        WorkUnit::new(
            Uuid::new_v4(),
            "detector",
            vec![SourceImage {
                id: Uuid::new_v4(),
                url: "https://images.example/1.jpg".to_string(),
            }],
        )
    }

    fn unavailable() -> OrchestrationError {
        OrchestrationError::ServiceUnavailable("timed out".to_string())
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    fn consumer(
        queue: &Arc<FakeQueue>,
        jobs: &Arc<FakeJobs>,
        inference: &Arc<ScriptedInference>,
    ) -> UnitConsumer {
        UnitConsumer::new(
            queue.clone(),
            jobs.clone(),
            inference.clone(),
            policy(),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let queue = Arc::new(FakeQueue::with(unit()));
        let jobs = Arc::new(FakeJobs::with_status(JobStatus::Started));
        let inference = Arc::new(ScriptedInference::failing(vec![unavailable(), unavailable()]));
        let consumer = consumer(&queue, &jobs, &inference);

        let first = consumer.poll_once().await.unwrap();
        assert_eq!(first, Some(UnitDisposition::Retried { delay: Duration::from_millis(10) }));
        let second = consumer.poll_once().await.unwrap();
        assert_eq!(second, Some(UnitDisposition::Retried { delay: Duration::from_millis(20) }));
        let third = consumer.poll_once().await.unwrap();
        assert_eq!(third, Some(UnitDisposition::Completed));
        assert_eq!(consumer.poll_once().await.unwrap(), None);

        let reports = jobs.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attempts, 3);
        assert!(reports[0].outcome.is_success());
        assert_eq!(inference.calls(), 3);
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_reported_at_once() {
        let queue = Arc::new(FakeQueue::with(unit()));
        let jobs = Arc::new(FakeJobs::with_status(JobStatus::Started));
        let inference = Arc::new(ScriptedInference::failing(vec![
            OrchestrationError::RemoteInferenceError {
                status: Some(422),
                message: "unsupported image".to_string(),
            },
        ]));
        let consumer = consumer(&queue, &jobs, &inference);

        assert_eq!(consumer.poll_once().await.unwrap(), Some(UnitDisposition::Failed));

        let reports = jobs.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attempts, 1);
        match &reports[0].outcome {
            UnitOutcome::Failed { reason } => assert!(reason.contains("unsupported image")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(queue.nacks.lock().unwrap().is_empty());
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let queue = Arc::new(FakeQueue::with(unit()));
        let jobs = Arc::new(FakeJobs::with_status(JobStatus::Started));
        let inference = Arc::new(ScriptedInference::failing(vec![
            unavailable(),
            unavailable(),
            unavailable(),
        ]));
        let consumer = consumer(&queue, &jobs, &inference);

        for _ in 0..2 {
            assert!(matches!(
                consumer.poll_once().await.unwrap(),
                Some(UnitDisposition::Retried { .. })
            ));
        }
        assert_eq!(consumer.poll_once().await.unwrap(), Some(UnitDisposition::Failed));

        let reports = jobs.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attempts, 3);
        assert!(!reports[0].outcome.is_success());
    }

    #[tokio::test]
    async fn test_units_of_terminal_jobs_are_dropped() {
        let queue = Arc::new(FakeQueue::with(unit()));
        let jobs = Arc::new(FakeJobs::with_status(JobStatus::Cancelled));
        let inference = Arc::new(ScriptedInference::failing(vec![]));
        let consumer = consumer(&queue, &jobs, &inference);

        assert_eq!(consumer.poll_once().await.unwrap(), Some(UnitDisposition::Dropped));
        assert_eq!(inference.calls(), 0);
        assert!(jobs.reports().is_empty());
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_unreported_unit_keeps_its_lease() {
        let queue = Arc::new(FakeQueue::with(unit()));
        let jobs = Arc::new(FakeJobs::unreachable());
        let inference = Arc::new(ScriptedInference::failing(vec![]));
        let consumer = consumer(&queue, &jobs, &inference);

        assert_eq!(consumer.poll_once().await.unwrap(), Some(UnitDisposition::Abandoned));
        assert_eq!(queue.acked(), 0);
        assert_eq!(queue.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let queue = Arc::new(FakeQueue::default());
        let jobs = Arc::new(FakeJobs::with_status(JobStatus::Started));
        let inference = Arc::new(ScriptedInference::failing(vec![]));

        assert_eq!(consumer(&queue, &jobs, &inference).poll_once().await.unwrap(), None);
    }
}
