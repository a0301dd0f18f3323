//! Work units
//!
//! A work unit is the smallest schedulable piece of a job: a batch of
//! source images sent to one processing service invocation. Units live only
//! in the queue; their outcomes are folded into the job's progress.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dto::processing::PipelineResults;

/// Image the processing service fetches and analyses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    pub id: Uuid,
    pub url: String,
}

/// Queue-resident piece of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Identity used to make reconciliation idempotent
    pub id: Uuid,
    pub job_id: Uuid,
    pub pipeline: String,
    pub images: Vec<SourceImage>,
    /// Deliveries that already failed transiently
    pub attempt_count: u32,
}

impl WorkUnit {
    pub fn new(job_id: Uuid, pipeline: impl Into<String>, images: Vec<SourceImage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            pipeline: pipeline.into(),
            images,
            attempt_count: 0,
        }
    }

    /// 1-based number of the delivery being processed
    pub fn attempt(&self) -> u32 {
        self.attempt_count + 1
    }
}

/// Splits images into unit payloads of at most `batch_size` images.
///
/// A `batch_size` of zero is treated as one image per unit.
pub fn partition(images: Vec<SourceImage>, batch_size: usize) -> Vec<Vec<SourceImage>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(images.len().div_ceil(batch_size));
    let mut iter = images.into_iter().peekable();

    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }

    batches
}

/// Final result of one unit as reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Succeeded { results: PipelineResults },
    Failed { reason: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded { .. })
    }
}

/// Outcome report sent from a worker to the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit_id: Uuid,
    pub job_id: Uuid,
    /// Attempts spent on the unit, including the final one
    pub attempts: u32,
    pub outcome: UnitOutcome,
}
