//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobStatus, TargetScope};

/// Request to create and dispatch a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub pipeline: String,
    #[serde(default)]
    pub target: TargetScope,
}

/// Query filter for listing jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub pipeline: Option<String>,
}

/// What the reconciler did with a unit report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Counted; `status` is the job status afterwards
    Applied { status: JobStatus },
    /// Already reconciled earlier; nothing changed
    Duplicate,
    /// Job already terminal; the report was dropped
    Ignored { status: JobStatus },
}
