//! Error types shared by the orchestrator and workers

use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::JobStatus;

/// Errors raised by the pure domain logic in this crate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid pipeline name '{0}': expected lowercase letters, digits, '-' or '_'")]
    InvalidPipelineName(String),

    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),

    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("progress overflow: {completed} completed + {failed} failed exceeds total {total}")]
    ProgressOverflow {
        total: u32,
        completed: u32,
        failed: u32,
    },
}

/// Orchestration error taxonomy
///
/// Unit-level errors are classified as transient (retried up to the attempt
/// limit) or permanent (unit fails at once). None of them reach API callers
/// directly; they surface only through a Job's terminal `error_detail`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    /// Pipeline name is not registered. Fatal at worker boot.
    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),

    /// Some units of a job could not be enqueued
    #[error("dispatch failed: {unenqueued} of {total} unit(s) not enqueued")]
    DispatchFailure { unenqueued: u32, total: u32 },

    /// No fresh processing service, or the service could not be reached
    #[error("processing service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The remote service rejected the request or answered with garbage
    #[error("remote inference error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    RemoteInferenceError {
        status: Option<u16>,
        message: String,
    },

    /// The same unit outcome was delivered twice
    #[error("unit {unit_id} of job {job_id} already reconciled")]
    ReconciliationConflict { job_id: Uuid, unit_id: Uuid },
}

impl OrchestrationError {
    /// Whether a unit failing with this error should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OrchestrationError::ServiceUnavailable("timeout".into()).is_transient());
        assert!(
            !OrchestrationError::RemoteInferenceError {
                status: Some(422),
                message: "bad payload".into()
            }
            .is_transient()
        );
        assert!(!OrchestrationError::UnknownPipeline("foo-bar".into()).is_transient());
    }

    #[test]
    fn test_remote_error_display() {
        let err = OrchestrationError::RemoteInferenceError {
            status: Some(400),
            message: "missing source_images".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote inference error (status 400): missing source_images"
        );

        let err = OrchestrationError::RemoteInferenceError {
            status: None,
            message: "malformed response".into(),
        };
        assert_eq!(err.to_string(), "remote inference error: malformed response");
    }
}
