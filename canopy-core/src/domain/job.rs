//! Job domain types and state machine
//!
//! A job is one request to run a pipeline over a target scope of images.
//! Its status only moves forward:
//!
//! ```text
//! Created --(units enqueued)--> Queued --(first unit started)--> Started
//! Started --(all units finished)--> Success | PartialFailure | Failure
//! Created | Queued --(dispatch error)--> Failure
//! Started --(watchdog timeout)--> Failure
//! any non-terminal --(cancel)--> Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, OrchestrationError};

/// Job execution record
///
/// Owned by the orchestrator and mutated only through the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Pipeline name as requested (may be unknown to the registry)
    pub pipeline: String,
    pub target: TargetScope,
    pub status: JobStatus,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last state change or unit report; drives stall detection
    pub last_activity_at: DateTime<Utc>,
    pub error_detail: Option<ErrorDetail>,
}

/// Images a job should process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetScope {
    #[serde(default)]
    pub images: Vec<Uuid>,
    #[serde(default)]
    pub collections: Vec<Uuid>,
}

impl TargetScope {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.collections.is_empty()
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Queued,
    Started,
    Success,
    Failure,
    PartialFailure,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Created,
        JobStatus::Queued,
        JobStatus::Started,
        JobStatus::Success,
        JobStatus::Failure,
        JobStatus::PartialFailure,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success
                | JobStatus::Failure
                | JobStatus::PartialFailure
                | JobStatus::Cancelled
        )
    }

    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Created, Queued) => true,
            (Queued, Started) => true,
            (Started, Success | PartialFailure | Failure) => true,
            (Created | Queued, Failure) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Started => "STARTED",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::PartialFailure => "PARTIAL_FAILURE",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Unit counters of a job
///
/// `completed + failed <= total` is enforced by [`Progress::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl Progress {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
        }
    }

    pub fn finished(&self) -> u32 {
        self.completed + self.failed
    }

    pub fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.finished())
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.finished() == self.total
    }

    /// Counts one finished unit
    pub fn record(&mut self, succeeded: bool) -> Result<(), CoreError> {
        if self.finished() >= self.total {
            return Err(CoreError::ProgressOverflow {
                total: self.total,
                completed: self.completed + u32::from(succeeded),
                failed: self.failed + u32::from(!succeeded),
            });
        }
        if succeeded {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        Ok(())
    }

    /// Terminal status implied by the counters, once every unit finished.
    ///
    /// Depends only on the final counts, never on the order units finished in.
    pub fn terminal_status(&self) -> Option<JobStatus> {
        if !self.is_complete() {
            return None;
        }
        Some(match (self.completed, self.failed) {
            (_, 0) => JobStatus::Success,
            (0, _) => JobStatus::Failure,
            _ => JobStatus::PartialFailure,
        })
    }
}

/// Why a job ended in a failure state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownPipeline,
    EmptyTarget,
    DispatchFailure,
    UnitsFailed,
    Timeout,
}

/// Structured failure summary attached to a terminal job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unenqueued: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_units: Option<u32>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            unenqueued: None,
            failed_units: None,
        }
    }

    pub fn unknown_pipeline(name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownPipeline,
            format!("pipeline '{}' is not registered", name),
        )
    }

    /// Detail for a dispatch that stopped before every unit was enqueued.
    ///
    /// The message is `err` followed by the underlying `cause`; `unenqueued`
    /// is carried over when `err` is a [`OrchestrationError::DispatchFailure`].
    pub fn dispatch_failure(err: &OrchestrationError, cause: &str) -> Self {
        let unenqueued = match *err {
            OrchestrationError::DispatchFailure { unenqueued, .. } => Some(unenqueued),
            _ => None,
        };
        Self {
            unenqueued,
            ..Self::new(ErrorKind::DispatchFailure, format!("{}: {}", err, cause))
        }
    }
}

/// What happened to a job after a unit outcome was counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRecorded {
    pub status: JobStatus,
    /// The job reached a terminal state with this unit
    pub finished: bool,
}

impl Job {
    /// Creates a job in the `Created` state
    pub fn new(pipeline: impl Into<String>, target: TargetScope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            target,
            status: JobStatus::Created,
            progress: Progress::default(),
            created_at: now,
            queued_at: None,
            started_at: None,
            finished_at: None,
            last_activity_at: now,
            error_detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a state machine edge, stamping the matching timestamp
    pub fn transition(&mut self, next: JobStatus, at: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        match next {
            JobStatus::Queued => self.queued_at = Some(at),
            JobStatus::Started => self.started_at = Some(at),
            status if status.is_terminal() => self.finished_at = Some(at),
            _ => {}
        }
        self.status = next;
        self.last_activity_at = at;
        Ok(())
    }

    /// `Created -> Queued` with the number of units about to be enqueued
    pub fn mark_queued(&mut self, total_units: u32, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Queued, at)?;
        self.progress = Progress::new(total_units);
        Ok(())
    }

    /// Notes that a unit began executing; moves `Queued -> Started` once
    pub fn mark_unit_started(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status == JobStatus::Queued {
            self.transition(JobStatus::Started, at)?;
        } else if self.status == JobStatus::Started {
            self.last_activity_at = at;
        } else {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: JobStatus::Started,
            });
        }
        Ok(())
    }

    /// Counts a finished unit and settles the job if it was the last one
    pub fn record_unit(&mut self, succeeded: bool, at: DateTime<Utc>) -> Result<UnitRecorded, CoreError> {
        self.mark_unit_started(at)?;
        self.progress.record(succeeded)?;

        if let Some(terminal) = self.progress.terminal_status() {
            if terminal != JobStatus::Success {
                self.error_detail = Some(ErrorDetail {
                    failed_units: Some(self.progress.failed),
                    ..ErrorDetail::new(
                        ErrorKind::UnitsFailed,
                        format!(
                            "{} of {} unit(s) failed",
                            self.progress.failed, self.progress.total
                        ),
                    )
                });
            }
            self.transition(terminal, at)?;
            return Ok(UnitRecorded {
                status: terminal,
                finished: true,
            });
        }

        Ok(UnitRecorded {
            status: self.status,
            finished: false,
        })
    }

    /// Moves a non-terminal job to `Failure` with the given detail
    pub fn fail(&mut self, detail: ErrorDetail, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failure, at)?;
        self.error_detail = Some(detail);
        Ok(())
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelled, at)
    }

    /// Whether a non-terminal job has shown no activity since `cutoff`.
    ///
    /// Covers `Created` and `Queued` too: a dispatch abandoned midway leaves
    /// the job there with nothing left to move it.
    pub fn is_stalled(&self, cutoff: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.last_activity_at < cutoff
    }
}
