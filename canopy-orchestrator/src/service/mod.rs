//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod dispatch;
pub mod job;
pub mod liveness;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod watchdog;

#[cfg(test)]
mod scenarios;

pub use dispatch::Dispatcher;
pub use job::{JobLocks, JobService};
pub use liveness::LivenessMonitor;
pub use queue::QueueService;
pub use reconcile::Reconciler;
pub use registry::RegistryService;
pub use watchdog::Watchdog;

use canopy_client::ClientError;
use canopy_core::CoreError;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::isolation::IsolationError;
use crate::repository::RepositoryError;

/// Service error type
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// A processing service could not be reached or answered badly
    #[error("processing service error: {0}")]
    Remote(#[from] ClientError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ServiceError::NotFound(what),
            RepositoryError::Conflict(what) => {
                ServiceError::Conflict(format!("{} already exists", what))
            }
            other => ServiceError::Repository(other),
        }
    }
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownPipeline(name) => ServiceError::NotFound(format!("pipeline '{}'", name)),
            CoreError::InvalidPipelineName(_) => ServiceError::InvalidRequest(err.to_string()),
            CoreError::InvalidTransition { .. } | CoreError::ProgressOverflow { .. } => {
                ServiceError::Conflict(err.to_string())
            }
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// `now - window`, clamped to the earliest representable instant
pub(crate) fn cutoff(now: DateTime<Utc>, window: std::time::Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for service tests

    use std::time::Duration;

    use canopy_core::domain::backend::{Backend, Liveness, ProcessingService};
    use canopy_core::domain::pipeline::Pipeline;
    use canopy_core::domain::unit::SourceImage;
    use chrono::Utc;

    use crate::repository::{ImageRepository, MemoryStore, RegistryRepository};

    pub const THRESHOLD: Duration = Duration::from_secs(120);

    /// Registers `name` with one backend and one freshly probed service
    pub async fn register_pipeline(store: &MemoryStore, name: &str, endpoint: &str) -> Pipeline {
        let pipeline = Pipeline::new(name, None).unwrap();
        let backend = Backend::new(format!("{}-backend", name));
        let mut service = ProcessingService::new(
            format!("{}-service", name),
            backend.id,
            Some(endpoint.to_string()),
        );
        let now = Utc::now();
        service.liveness = Liveness {
            last_seen: Some(now),
            last_seen_live: Some(now),
            last_seen_latency: Some(Duration::from_millis(20)),
        };

        store.create_pipeline(&pipeline).await.unwrap();
        store.create_backend(&backend).await.unwrap();
        store.link_backend(backend.id, pipeline.id).await.unwrap();
        store.create_service(&service).await.unwrap();
        store.find_pipeline(name).await.unwrap().unwrap()
    }

    pub async fn register_images(store: &MemoryStore, n: usize) -> Vec<SourceImage> {
        store
            .register((0..n).map(|i| format!("https://images.example/{}.jpg", i)).collect())
            .await
            .unwrap()
    }
}
