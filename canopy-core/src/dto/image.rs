//! Source image DTOs
//!
//! Images and collections are owned by the surrounding platform; the
//! orchestrator only keeps enough of them to expand a job's target scope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to register source images by URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterImages {
    pub urls: Vec<String>,
}

/// Request to create a named set of images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollection {
    pub name: String,
    #[serde(default)]
    pub images: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub images: Vec<Uuid>,
}
