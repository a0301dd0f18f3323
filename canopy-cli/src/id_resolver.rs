//! ID resolver module
//!
//! Handles resolution of UUID prefixes to full UUIDs by querying the API.
//! This allows users to specify short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use canopy_client::OrchestratorClient;
use canopy_core::dto::job::JobFilter;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, fetches all jobs and finds the one matching the prefix.
pub async fn resolve_job_id(client: &OrchestratorClient, id: &IdOrPrefix) -> Result<Uuid> {
    if let IdOrPrefix::Full(uuid) = id {
        return Ok(*uuid);
    }

    let jobs = client
        .list_jobs(&JobFilter::default())
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    unique_match("job", id, jobs.iter().map(|j| j.id))
}

/// Resolve a backend ID or prefix to a full UUID
pub async fn resolve_backend_id(client: &OrchestratorClient, id: &IdOrPrefix) -> Result<Uuid> {
    if let IdOrPrefix::Full(uuid) = id {
        return Ok(*uuid);
    }

    let backends = client
        .list_backends()
        .await
        .context("Failed to fetch backends for ID resolution")?;

    unique_match("backend", id, backends.iter().map(|b| b.id))
}

/// Resolve a processing service ID or prefix to a full UUID
pub async fn resolve_service_id(client: &OrchestratorClient, id: &IdOrPrefix) -> Result<Uuid> {
    if let IdOrPrefix::Full(uuid) = id {
        return Ok(*uuid);
    }

    let services = client
        .list_services()
        .await
        .context("Failed to fetch services for ID resolution")?;

    unique_match("service", id, services.iter().map(|s| s.id))
}

/// Picks the single candidate named by `id`
///
/// # Errors
/// Returns an error if no candidate matches or the prefix is ambiguous
fn unique_match(kind: &str, id: &IdOrPrefix, candidates: impl Iterator<Item = Uuid>) -> Result<Uuid> {
    let matches: Vec<Uuid> = candidates.filter(|c| id.matches(*c)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No {} found with ID starting with '{}'", kind, id)),
        [only] => Ok(*only),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                id,
                kind,
                ids.join(", ")
            ))
        }
    }
}
