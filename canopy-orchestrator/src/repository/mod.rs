//! Repository Module
//!
//! Data access layer for the orchestrator. Each trait covers one concern and
//! has two implementations: Postgres through `sqlx` and an in-memory store
//! used by tests and `CANOPY_STORE=memory`.

pub mod image;
pub mod job;
pub mod memory;
pub mod queue;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use canopy_core::domain::backend::{Backend, ProcessingService};
use canopy_core::domain::job::{Job, TargetScope};
use canopy_core::domain::pipeline::Pipeline;
use canopy_core::domain::unit::{SourceImage, WorkUnit};
use canopy_core::dto::image::{Collection, CreateCollection};
use canopy_core::dto::job::JobFilter;
use canopy_core::dto::processing::{Detection, PipelineResults};
use canopy_core::dto::queue::Lease;
use canopy_core::registry::RegistryGraph;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use image::PgImageRepository;
pub use job::PgJobRepository;
pub use memory::MemoryStore;
pub use queue::PgWorkQueue;
pub use registry::PgRegistryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    /// Unique constraint violated
    #[error("{0} already exists")]
    Conflict(String),

    /// Queue refused the unit
    #[error("queue '{0}' is full")]
    QueueFull(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("in-memory store lock poisoned")]
    Poisoned,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

impl RepositoryError {
    /// Maps constraint violations of an insert to `Conflict` / `NotFound`
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(what.into()),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Self::NotFound(format!("parent of {}", what.into()))
            }
            _ => Self::Database(err),
        }
    }
}

/// Pipelines, backends and processing services
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    /// Loads the whole registry as an id-keyed graph
    async fn load_graph(&self) -> RepoResult<RegistryGraph>;

    async fn find_pipeline(&self, name: &str) -> RepoResult<Option<Pipeline>>;

    /// Fails with `Conflict` if the name is taken
    async fn create_pipeline(&self, pipeline: &Pipeline) -> RepoResult<()>;

    async fn create_backend(&self, backend: &Backend) -> RepoResult<()>;

    /// Idempotent; `NotFound` if either side is missing
    async fn link_backend(&self, backend_id: Uuid, pipeline_id: Uuid) -> RepoResult<()>;

    async fn create_service(&self, service: &ProcessingService) -> RepoResult<()>;

    async fn find_service(&self, id: Uuid) -> RepoResult<Option<ProcessingService>>;

    /// Assigns or clears the endpoint; a changed endpoint also clears the
    /// liveness triple in the same write
    async fn set_endpoint(&self, id: Uuid, endpoint_url: Option<String>) -> RepoResult<()>;

    /// Writes the three liveness fields in one statement
    async fn record_probe_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        latency: Duration,
    ) -> RepoResult<()>;

    /// Advances `last_seen` only
    async fn record_probe_failure(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()>;
}

/// A unit outcome ready to be committed
#[derive(Debug, Clone, Copy)]
pub struct UnitCommit<'a> {
    pub unit_id: Uuid,
    pub succeeded: bool,
    pub attempts: u32,
    pub results: Option<&'a PipelineResults>,
}

/// Jobs, their outcome ledger and persisted detections
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> RepoResult<()>;

    /// Overwrites status, progress, timestamps and error detail
    async fn update(&self, job: &Job) -> RepoResult<()>;

    async fn find(&self, id: Uuid) -> RepoResult<Option<Job>>;

    /// Newest first
    async fn list(&self, filter: &JobFilter) -> RepoResult<Vec<Job>>;

    /// Non-terminal jobs whose last activity is older than `cutoff`
    async fn find_stalled(&self, cutoff: DateTime<Utc>) -> RepoResult<Vec<Job>>;

    async fn is_unit_recorded(&self, job_id: Uuid, unit_id: Uuid) -> RepoResult<bool>;

    /// Atomically adds the unit to the ledger, stores its detections and
    /// writes the updated job. `Conflict` if the unit was already recorded,
    /// in which case nothing is written.
    async fn commit_unit(&self, job: &Job, unit: UnitCommit<'_>) -> RepoResult<()>;

    async fn detections(&self, job_id: Uuid) -> RepoResult<Vec<Detection>>;
}

/// Pipeline work queues with lease semantics
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, queue_name: &str, unit: &WorkUnit) -> RepoResult<()>;

    /// Claims the oldest visible unit for `lease_for`; `None` if nothing is
    /// visible
    async fn lease(
        &self,
        queue_name: &str,
        worker_id: &str,
        lease_for: Duration,
    ) -> RepoResult<Option<Lease>>;

    /// Deletes the leased unit
    async fn ack(&self, lease_id: Uuid) -> RepoResult<()>;

    /// Releases the unit with `attempt_count + 1`, visible again after `delay`
    async fn nack(&self, lease_id: Uuid, delay: Duration) -> RepoResult<()>;
}

/// Source images and collections known to the orchestrator
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn register(&self, urls: Vec<String>) -> RepoResult<Vec<SourceImage>>;

    async fn create_collection(&self, req: CreateCollection) -> RepoResult<Collection>;

    /// Explicit images, then the images of each collection in order,
    /// de-duplicated keeping the first occurrence. Unknown ids are skipped.
    async fn expand(&self, target: &TargetScope) -> RepoResult<Vec<SourceImage>>;
}

/// `from + delay`, saturating instead of overflowing
pub(crate) fn deadline(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| from.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Order-preserving de-duplication shared by both image stores
pub(crate) fn dedup_images(images: impl IntoIterator<Item = SourceImage>) -> Vec<SourceImage> {
    let mut seen = std::collections::HashSet::new();
    images.into_iter().filter(|image| seen.insert(image.id)).collect()
}
