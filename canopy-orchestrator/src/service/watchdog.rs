//! Watchdog
//!
//! Fails non-terminal jobs that have shown no activity for longer than the
//! stall timeout, so a job whose workers vanished, or whose dispatch was
//! abandoned midway, still reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::domain::job::{ErrorDetail, ErrorKind};
use chrono::Utc;
use uuid::Uuid;

use super::{JobLocks, ServiceResult, cutoff};
use crate::repository::JobRepository;

pub struct Watchdog {
    jobs: Arc<dyn JobRepository>,
    locks: JobLocks,
    stall_timeout: Duration,
}

impl Watchdog {
    pub fn new(jobs: Arc<dyn JobRepository>, locks: JobLocks, stall_timeout: Duration) -> Self {
        Self {
            jobs,
            locks,
            stall_timeout,
        }
    }

    /// Fails every stalled job; returns the ids that were failed
    pub async fn sweep(&self) -> ServiceResult<Vec<Uuid>> {
        let stalled = self.jobs.find_stalled(cutoff(Utc::now(), self.stall_timeout)).await?;
        let mut failed = Vec::new();

        for candidate in stalled {
            let _guard = self.locks.lock(candidate.id).await;

            // Activity may have landed while waiting for the lock
            let Some(mut job) = self.jobs.find(candidate.id).await? else {
                continue;
            };
            let now = Utc::now();
            if !job.is_stalled(cutoff(now, self.stall_timeout)) {
                continue;
            }

            let idle = self.stall_timeout.as_secs();
            let detail = match job.queued_at {
                // Never got past dispatch
                None => ErrorDetail::new(
                    ErrorKind::DispatchFailure,
                    format!("dispatch did not complete within {}s", idle),
                ),
                Some(_) => ErrorDetail::new(
                    ErrorKind::Timeout,
                    format!("no unit activity for {}s", idle),
                ),
            };
            let status = job.status;
            job.fail(detail, now)?;
            self.jobs.update(&job).await?;

            tracing::warn!(
                "Job {} timed out in {} ({}/{} completed, {} failed)",
                job.id,
                status,
                job.progress.completed,
                job.progress.total,
                job.progress.failed
            );
            failed.push(job.id);
        }

        Ok(failed)
    }

    /// Sweep loop; runs until the task is dropped
    pub async fn run(self: Arc<Self>, interval: Duration) {
        tracing::info!(
            "Watchdog sweeping every {:?} (stall timeout {:?})",
            interval,
            self.stall_timeout
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                tracing::error!("Watchdog sweep failed: {}", e);
            }
        }
    }
}
