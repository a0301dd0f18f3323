//! Result Reconciler
//!
//! Folds unit outcomes reported by workers into their job. Delivery is
//! at-least-once, so the same report may arrive more than once; the job's
//! outcome ledger makes applying it idempotent.

use std::sync::Arc;

use canopy_core::OrchestrationError;
use canopy_core::domain::unit::{UnitOutcome, UnitReport};
use canopy_core::dto::job::ApplyOutcome;
use chrono::Utc;
use uuid::Uuid;

use super::{JobLocks, ServiceError, ServiceResult};
use crate::repository::{JobRepository, RepositoryError, UnitCommit};

pub struct Reconciler {
    jobs: Arc<dyn JobRepository>,
    locks: JobLocks,
}

impl Reconciler {
    pub fn new(jobs: Arc<dyn JobRepository>, locks: JobLocks) -> Self {
        Self { jobs, locks }
    }

    pub async fn apply(&self, job_id: Uuid, report: UnitReport) -> ServiceResult<ApplyOutcome> {
        if report.job_id != job_id {
            return Err(ServiceError::InvalidRequest(format!(
                "unit {} belongs to job {}, not {}",
                report.unit_id, report.job_id, job_id
            )));
        }

        let _guard = self.locks.lock(job_id).await;
        let mut job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("job {}", job_id)))?;

        if job.is_terminal() {
            tracing::debug!(
                "Dropping outcome of unit {}: job {} is already {}",
                report.unit_id,
                job_id,
                job.status
            );
            return Ok(ApplyOutcome::Ignored { status: job.status });
        }

        if self.jobs.is_unit_recorded(job_id, report.unit_id).await? {
            return Ok(duplicate(job_id, report.unit_id));
        }

        let succeeded = report.outcome.is_success();
        if let UnitOutcome::Failed { reason } = &report.outcome {
            tracing::warn!(
                "Unit {} of job {} failed after {} attempt(s): {}",
                report.unit_id,
                job_id,
                report.attempts,
                reason
            );
        }

        let recorded = job.record_unit(succeeded, Utc::now())?;
        let commit = UnitCommit {
            unit_id: report.unit_id,
            succeeded,
            attempts: report.attempts,
            results: match &report.outcome {
                UnitOutcome::Succeeded { results } => Some(results),
                UnitOutcome::Failed { .. } => None,
            },
        };

        match self.jobs.commit_unit(&job, commit).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Ok(duplicate(job_id, report.unit_id)),
            Err(e) => return Err(e.into()),
        }

        if recorded.finished {
            tracing::info!(
                "Job {} finished with {} ({}/{} completed, {} failed)",
                job_id,
                recorded.status,
                job.progress.completed,
                job.progress.total,
                job.progress.failed
            );
        }

        Ok(ApplyOutcome::Applied {
            status: recorded.status,
        })
    }
}

fn duplicate(job_id: Uuid, unit_id: Uuid) -> ApplyOutcome {
    tracing::info!("{}", OrchestrationError::ReconciliationConflict { job_id, unit_id });
    ApplyOutcome::Duplicate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use canopy_core::domain::job::{Job, JobStatus, TargetScope};
    use canopy_core::dto::processing::{BoundingBox, Detection, PipelineResults};
    use proptest::prelude::*;

    async fn queued_job(store: &MemoryStore, total: u32) -> Job {
        let mut job = Job::new("detector", TargetScope::default());
        store.insert(&job).await.unwrap();
        job.mark_queued(total, Utc::now()).unwrap();
        store.update(&job).await.unwrap();
        job
    }

    fn success(job_id: Uuid, unit_id: Uuid) -> UnitReport {
        let image = Uuid::new_v4();
        UnitReport {
            unit_id,
            job_id,
            attempts: 1,
            outcome: UnitOutcome::Succeeded {
                results: PipelineResults {
                    pipeline: "detector".into(),
                    source_images: vec![],
                    detections: vec![Detection {
                        source_image_id: image,
                        bbox: BoundingBox {
                            x1: 0.0,
                            y1: 0.0,
                            x2: 10.0,
                            y2: 10.0,
                        },
                        algorithm: "yolo".into(),
                        timestamp: Utc::now(),
                        classifications: vec![],
                    }],
                    total_time: 0.5,
                },
            },
        }
    }

    fn failure(job_id: Uuid, unit_id: Uuid) -> UnitReport {
        UnitReport {
            unit_id,
            job_id,
            attempts: 1,
            outcome: UnitOutcome::Failed {
                reason: "422 unprocessable".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_duplicate_outcome_counted_once() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), JobLocks::new());
        let job = queued_job(&store, 2).await;
        let report = success(job.id, Uuid::new_v4());

        let first = reconciler.apply(job.id, report.clone()).await.unwrap();
        assert_eq!(first, ApplyOutcome::Applied { status: JobStatus::Started });

        let second = reconciler.apply(job.id, report).await.unwrap();
        assert_eq!(second, ApplyOutcome::Duplicate);

        let stored = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress.completed, 1);
        assert_eq!(store.detections(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_for_terminal_job_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), JobLocks::new());
        let mut job = queued_job(&store, 1).await;
        job.cancel(Utc::now()).unwrap();
        store.update(&job).await.unwrap();

        let outcome = reconciler
            .apply(job.id, success(job.id, Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Ignored { status: JobStatus::Cancelled });

        let stored = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress.finished(), 0);
        assert!(store.detections(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_job_id_rejected() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), JobLocks::new());
        let job = queued_job(&store, 1).await;

        let result = reconciler
            .apply(job.id, success(Uuid::new_v4(), Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reports_settle_once() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Arc::new(Reconciler::new(store.clone(), JobLocks::new()));
        let job = queued_job(&store, 8).await;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let reconciler = reconciler.clone();
            let report = if i % 2 == 0 {
                success(job.id, Uuid::new_v4())
            } else {
                failure(job.id, Uuid::new_v4())
            };
            tasks.spawn(async move { reconciler.apply(report.job_id, report).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let stored = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::PartialFailure);
        assert_eq!(stored.progress.completed, 4);
        assert_eq!(stored.progress.failed, 4);
    }

    proptest! {
        #[test]
        fn test_terminal_status_is_order_independent(
            (outcomes, order) in proptest::collection::vec(any::<bool>(), 1..12).prop_flat_map(|outcomes| {
                let indices: Vec<usize> = (0..outcomes.len()).collect();
                (Just(outcomes), Just(indices).prop_shuffle())
            }),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let expected = match (outcomes.iter().filter(|ok| **ok).count(), outcomes.len()) {
                (ok, n) if ok == n => JobStatus::Success,
                (0, _) => JobStatus::Failure,
                _ => JobStatus::PartialFailure,
            };

            let (in_order, shuffled) = runtime.block_on(async {
                let settle = |deliveries: Vec<bool>, redeliver: bool| async move {
                    let store = Arc::new(MemoryStore::new());
                    let reconciler = Reconciler::new(store.clone(), JobLocks::new());
                    let job = queued_job(&store, deliveries.len() as u32).await;
                    for ok in deliveries {
                        let report = if ok {
                            success(job.id, Uuid::new_v4())
                        } else {
                            failure(job.id, Uuid::new_v4())
                        };
                        reconciler.apply(job.id, report.clone()).await.unwrap();
                        if redeliver {
                            reconciler.apply(job.id, report).await.unwrap();
                        }
                    }
                    store.find(job.id).await.unwrap().unwrap()
                };

                let shuffled: Vec<bool> = order.iter().map(|&i| outcomes[i]).collect();
                (settle(outcomes.clone(), false).await, settle(shuffled, true).await)
            });

            prop_assert_eq!(in_order.status, expected);
            prop_assert_eq!(shuffled.status, expected);
            prop_assert_eq!(in_order.progress, shuffled.progress);
        }
    }
}
