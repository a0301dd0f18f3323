//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::CoreError;

/// Prefix shared by every pipeline work queue
pub const QUEUE_PREFIX: &str = "ml-pipeline-";

/// Longest accepted pipeline name
pub const MAX_PIPELINE_NAME_LEN: usize = 200;

/// Derives the work queue name for a pipeline.
///
/// Pure and total: depends on nothing but the name, so two distinct
/// pipeline names can never share a queue.
pub fn queue_name_for(pipeline_name: &str) -> String {
    format!("{QUEUE_PREFIX}{pipeline_name}")
}

/// Checks that a pipeline name is a slug usable inside a queue name
pub fn validate_pipeline_name(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_rest =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

    if !valid_first || !valid_rest || name.len() > MAX_PIPELINE_NAME_LEN {
        return Err(CoreError::InvalidPipelineName(name.to_string()));
    }

    Ok(())
}

/// Named inference workflow bound to exactly one work queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub queue_name: String,
    /// Backends able to run this pipeline
    pub backends: BTreeSet<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Pipeline {
    /// Creates a pipeline with a validated name and its derived queue
    pub fn new(name: impl Into<String>, description: Option<String>) -> Result<Self, CoreError> {
        let name = name.into();
        validate_pipeline_name(&name)?;

        let now = chrono::Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            queue_name: queue_name_for(&name),
            name,
            description,
            backends: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_queue_name_derivation() {
        assert_eq!(queue_name_for("detector"), "ml-pipeline-detector");
        assert_eq!(
            queue_name_for("species-classifier"),
            "ml-pipeline-species-classifier"
        );
    }

    #[test]
    fn test_queue_name_is_deterministic_and_unique() {
        let names = ["detector", "species-classifier", "moth_binary", "panama-2024"];

        let first: Vec<String> = names.iter().map(|n| queue_name_for(n)).collect();
        let second: Vec<String> = names.iter().map(|n| queue_name_for(n)).collect();
        assert_eq!(first, second);

        let unique: HashSet<&String> = first.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_validate_pipeline_name() {
        assert!(validate_pipeline_name("detector").is_ok());
        assert!(validate_pipeline_name("species-classifier").is_ok());
        assert!(validate_pipeline_name("global_moths_2024").is_ok());

        assert!(validate_pipeline_name("").is_err());
        assert!(validate_pipeline_name("-leading-dash").is_err());
        assert!(validate_pipeline_name("Upper").is_err());
        assert!(validate_pipeline_name("has space").is_err());
        assert!(validate_pipeline_name(&"a".repeat(MAX_PIPELINE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_new_pipeline_binds_queue() {
        let pipeline = Pipeline::new("detector", None).unwrap();
        assert_eq!(pipeline.queue_name, "ml-pipeline-detector");
        assert!(pipeline.backends.is_empty());

        assert!(matches!(
            Pipeline::new("Not Valid", None),
            Err(CoreError::InvalidPipelineName(_))
        ));
    }
}
