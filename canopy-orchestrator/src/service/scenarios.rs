//! End-to-end job scenarios against the in-memory store
//!
//! Each test plays the worker's side by hand: lease, start, report, ack.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::domain::job::{ErrorKind, Job, JobStatus, TargetScope};
use canopy_core::domain::unit::{UnitOutcome, UnitReport};
use canopy_core::dto::job::{ApplyOutcome, CreateJob};
use canopy_core::dto::processing::PipelineResults;
use canopy_core::dto::queue::Lease;
use uuid::Uuid;

use super::dispatch::DispatchOptions;
use super::testing::{THRESHOLD, register_images, register_pipeline};
use super::{Dispatcher, JobLocks, JobService, LivenessMonitor, QueueService, Reconciler};
use crate::repository::{JobRepository, MemoryStore};

struct Harness {
    store: Arc<MemoryStore>,
    dispatcher: Dispatcher,
    jobs: JobService,
    reconciler: Reconciler,
    queue: QueueService,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let locks = JobLocks::new();
        let monitor = LivenessMonitor::new(store.clone(), Duration::from_secs(1), THRESHOLD);

        Self {
            dispatcher: Dispatcher::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
                monitor,
                locks.clone(),
                DispatchOptions {
                    batch_size: 1,
                    preflight: false,
                },
            ),
            jobs: JobService::new(store.clone(), locks.clone()),
            reconciler: Reconciler::new(store.clone(), locks),
            queue: QueueService::new(store.clone(), Duration::from_secs(60)),
            store,
        }
    }

    async fn submit(&self, pipeline: &str, images: usize) -> Job {
        let images = register_images(&self.store, images).await;
        self.dispatcher
            .dispatch(CreateJob {
                pipeline: pipeline.to_string(),
                target: TargetScope {
                    images: images.iter().map(|i| i.id).collect(),
                    collections: vec![],
                },
            })
            .await
            .unwrap()
    }

    async fn lease(&self) -> Lease {
        let lease = self
            .queue
            .lease("ml-pipeline-detector", "worker-1")
            .await
            .unwrap()
            .unwrap();
        self.jobs
            .start_unit(lease.unit.job_id, lease.unit.id)
            .await
            .unwrap();
        lease
    }

    async fn finish(&self, lease: &Lease, outcome: UnitOutcome) -> ApplyOutcome {
        let report = UnitReport {
            unit_id: lease.unit.id,
            job_id: lease.unit.job_id,
            attempts: lease.unit.attempt(),
            outcome,
        };
        let applied = self.reconciler.apply(report.job_id, report).await.unwrap();
        self.queue.ack(lease.lease_id).await.unwrap();
        applied
    }

    async fn job(&self, id: Uuid) -> Job {
        self.store.find(id).await.unwrap().unwrap()
    }
}

fn succeeded(lease: &Lease) -> UnitOutcome {
    UnitOutcome::Succeeded {
        results: PipelineResults {
            pipeline: lease.unit.pipeline.clone(),
            source_images: lease.unit.images.clone(),
            detections: vec![],
            total_time: 0.1,
        },
    }
}

fn failed() -> UnitOutcome {
    UnitOutcome::Failed {
        reason: "remote inference error (status 422): unsupported image".into(),
    }
}

#[tokio::test]
async fn test_all_units_succeed() {
    let h = Harness::new();
    register_pipeline(&h.store, "detector", "http://svc.local").await;
    let job = h.submit("detector", 3).await;
    assert_eq!(job.status, JobStatus::Queued);

    for _ in 0..3 {
        let lease = h.lease().await;
        h.finish(&lease, succeeded(&lease)).await;
    }

    let job = h.job(job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.progress.completed, 3);
    assert_eq!(job.progress.failed, 0);
    assert_eq!(job.progress.total, 3);
    assert!(job.finished_at.is_some());
    assert!(job.error_detail.is_none());
}

#[tokio::test]
async fn test_one_failure_is_partial_failure() {
    let h = Harness::new();
    register_pipeline(&h.store, "detector", "http://svc.local").await;
    let job = h.submit("detector", 2).await;

    let first = h.lease().await;
    h.finish(&first, failed()).await;
    let second = h.lease().await;
    let applied = h.finish(&second, succeeded(&second)).await;
    assert_eq!(applied, ApplyOutcome::Applied { status: JobStatus::PartialFailure });

    let job = h.job(job.id).await;
    assert_eq!(job.status, JobStatus::PartialFailure);
    assert_eq!(job.progress.completed, 1);
    assert_eq!(job.progress.failed, 1);
    let detail = job.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::UnitsFailed);
    assert_eq!(detail.failed_units, Some(1));
}

#[tokio::test]
async fn test_unregistered_pipeline_never_queues() {
    let h = Harness::new();
    let job = h.submit("foo-bar", 2).await;

    assert_eq!(job.status, JobStatus::Failure);
    assert!(job.queued_at.is_none());
    assert_eq!(job.error_detail.unwrap().kind, ErrorKind::UnknownPipeline);
    assert_eq!(h.store.queue_depth("ml-pipeline-foo-bar").unwrap(), 0);
}

#[tokio::test]
async fn test_redelivered_unit_counted_after_retries() {
    let h = Harness::new();
    register_pipeline(&h.store, "detector", "http://svc.local").await;
    let job = h.submit("detector", 1).await;

    // Two transient failures: the worker nacks and the unit comes back
    for attempt in 1..=2 {
        let lease = h.lease().await;
        assert_eq!(lease.unit.attempt(), attempt);
        h.queue.nack(lease.lease_id, Duration::ZERO).await.unwrap();
    }

    let lease = h.lease().await;
    assert_eq!(lease.unit.attempt(), 3);
    h.finish(&lease, succeeded(&lease)).await;

    let job = h.job(job.id).await;
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.progress.completed, 1);
}

#[tokio::test]
async fn test_cancel_with_unit_in_flight() {
    let h = Harness::new();
    register_pipeline(&h.store, "detector", "http://svc.local").await;
    let job = h.submit("detector", 3).await;

    let in_flight = h.lease().await;

    let cancelled = h.jobs.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(h.job(job.id).await.status, JobStatus::Cancelled);

    // The late outcome is dropped
    let applied = h.finish(&in_flight, succeeded(&in_flight)).await;
    assert_eq!(applied, ApplyOutcome::Ignored { status: JobStatus::Cancelled });

    // Remaining units are leased, seen to be cancelled and dropped
    let next = h.queue.lease("ml-pipeline-detector", "worker-2").await.unwrap().unwrap();
    let seen = h.jobs.start_unit(next.unit.job_id, next.unit.id).await.unwrap();
    assert!(seen.is_terminal());

    let job = h.job(job.id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.progress.finished(), 0);
}

#[tokio::test]
async fn test_duplicate_delivery_after_lease_expiry() {
    let h = Harness::new();
    register_pipeline(&h.store, "detector", "http://svc.local").await;
    let job = h.submit("detector", 2).await;

    let lease = h.lease().await;
    let report = UnitReport {
        unit_id: lease.unit.id,
        job_id: job.id,
        attempts: 1,
        outcome: succeeded(&lease),
    };

    // Report lands but the ack is lost; a second worker repeats the unit
    h.reconciler.apply(job.id, report.clone()).await.unwrap();
    let replay = h.reconciler.apply(job.id, report).await.unwrap();
    assert_eq!(replay, ApplyOutcome::Duplicate);

    let job = h.job(job.id).await;
    assert_eq!(job.progress.completed, 1);
    assert!(job.progress.finished() <= job.progress.total);
}
