//! Processing service protocol
//!
//! Wire types exchanged with remote processing services:
//! - `GET  /livez`   liveness
//! - `GET  /info`    pipelines served by the service
//! - `POST /process` run a pipeline over a batch of source images

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::unit::SourceImage;

/// Body of `POST /process`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub pipeline: String,
    pub source_images: Vec<SourceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Successful answer of `POST /process`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResults {
    pub pipeline: String,
    #[serde(default)]
    pub source_images: Vec<SourceImage>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Seconds spent by the service
    #[serde(default)]
    pub total_time: f64,
}

impl PipelineResults {
    /// Checks that the response answers the request it was given.
    ///
    /// Every detection must refer to one of the requested images.
    pub fn validate_against(&self, request: &PipelineRequest) -> Result<(), String> {
        if self.pipeline != request.pipeline {
            return Err(format!(
                "response is for pipeline '{}', expected '{}'",
                self.pipeline, request.pipeline
            ));
        }

        let requested: HashSet<Uuid> = request.source_images.iter().map(|i| i.id).collect();
        if let Some(stray) = self
            .detections
            .iter()
            .find(|d| !requested.contains(&d.source_image_id))
        {
            return Err(format!(
                "detection refers to image {} which was not requested",
                stray.source_image_id
            ));
        }

        Ok(())
    }

    pub fn classification_count(&self) -> usize {
        self.detections.iter().map(|d| d.classifications.len()).sum()
    }
}

/// Object found in a source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub source_image_id: Uuid,
    pub bbox: BoundingBox,
    pub algorithm: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub classifications: Vec<Classification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Taxon prediction attached to a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub classification: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub scores: Vec<f64>,
    pub algorithm: String,
    #[serde(default = "default_terminal")]
    pub terminal: bool,
    pub timestamp: DateTime<Utc>,
}

fn default_terminal() -> bool {
    true
}

/// Answer of `GET /info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub pipelines: Vec<PipelineInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}
