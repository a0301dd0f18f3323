//! In-memory store
//!
//! Implements every repository trait over process-local state behind one
//! lock. Used by the service tests and by `CANOPY_STORE=memory`.
//!
//! ## Limitations
//!
//! - Nothing survives a restart
//! - Single process only: workers must reach this orchestrator over HTTP

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::domain::backend::{Backend, ProcessingService};
use canopy_core::domain::job::{Job, TargetScope};
use canopy_core::domain::pipeline::Pipeline;
use canopy_core::domain::unit::{SourceImage, WorkUnit};
use canopy_core::dto::image::{Collection, CreateCollection};
use canopy_core::dto::job::JobFilter;
use canopy_core::dto::processing::Detection;
use canopy_core::dto::queue::Lease;
use canopy_core::registry::RegistryGraph;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    ImageRepository, JobRepository, RegistryRepository, RepoResult, RepositoryError, UnitCommit,
    WorkQueue, deadline, dedup_images,
};

#[derive(Debug)]
struct QueuedUnit {
    unit: WorkUnit,
    visible_at: DateTime<Utc>,
    lease_id: Option<Uuid>,
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    graph: RegistryGraph,
    jobs: HashMap<Uuid, Job>,
    ledger: HashSet<(Uuid, Uuid)>,
    detections: HashMap<Uuid, Vec<Detection>>,
    queues: HashMap<String, Vec<QueuedUnit>>,
    leases: HashMap<Uuid, String>,
    images: HashMap<Uuid, SourceImage>,
    collections: HashMap<Uuid, Collection>,
    next_seq: u64,
}

/// Process-local implementation of all repositories
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    /// Maximum units per queue; `None` is unbounded
    queue_capacity: Option<usize>,
}

fn poison_err<T>(_: PoisonError<T>) -> RepositoryError {
    RepositoryError::Poisoned
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose queues refuse units beyond `capacity`
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            queue_capacity: Some(capacity),
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(poison_err)
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(poison_err)
    }

    /// Units currently stored in a queue, leased or not
    pub fn queue_depth(&self, queue_name: &str) -> RepoResult<usize> {
        Ok(self.read()?.queues.get(queue_name).map_or(0, Vec::len))
    }
}

// =============================================================================
// Registry
// =============================================================================

#[async_trait]
impl RegistryRepository for MemoryStore {
    async fn load_graph(&self) -> RepoResult<RegistryGraph> {
        Ok(self.read()?.graph.clone())
    }

    async fn find_pipeline(&self, name: &str) -> RepoResult<Option<Pipeline>> {
        Ok(self.read()?.graph.resolve(name).ok().cloned())
    }

    async fn create_pipeline(&self, pipeline: &Pipeline) -> RepoResult<()> {
        if !self.write()?.graph.insert_pipeline(pipeline.clone()) {
            return Err(RepositoryError::Conflict(format!("pipeline '{}'", pipeline.name)));
        }
        Ok(())
    }

    async fn create_backend(&self, backend: &Backend) -> RepoResult<()> {
        if !self.write()?.graph.insert_backend(backend.clone()) {
            return Err(RepositoryError::Conflict(format!("backend '{}'", backend.name)));
        }
        Ok(())
    }

    async fn link_backend(&self, backend_id: Uuid, pipeline_id: Uuid) -> RepoResult<()> {
        if !self.write()?.graph.link(backend_id, pipeline_id) {
            return Err(RepositoryError::NotFound(format!(
                "backend {} or pipeline {}",
                backend_id, pipeline_id
            )));
        }
        Ok(())
    }

    async fn create_service(&self, service: &ProcessingService) -> RepoResult<()> {
        if !self.write()?.graph.insert_service(service.clone()) {
            return Err(RepositoryError::NotFound(format!("backend {}", service.backend_id)));
        }
        Ok(())
    }

    async fn find_service(&self, id: Uuid) -> RepoResult<Option<ProcessingService>> {
        Ok(self.read()?.graph.service(id).cloned())
    }

    async fn set_endpoint(&self, id: Uuid, endpoint_url: Option<String>) -> RepoResult<()> {
        if !self.write()?.graph.set_endpoint(id, endpoint_url) {
            return Err(RepositoryError::NotFound(format!("service {}", id)));
        }
        Ok(())
    }

    async fn record_probe_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        latency: Duration,
    ) -> RepoResult<()> {
        self.write()?
            .graph
            .update_liveness(id, |liveness| liveness.record_success(at, latency));
        Ok(())
    }

    async fn record_probe_failure(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()> {
        self.write()?
            .graph
            .update_liveness(id, |liveness| liveness.record_failure(at));
        Ok(())
    }
}

// =============================================================================
// Jobs
// =============================================================================

#[async_trait]
impl JobRepository for MemoryStore {
    async fn insert(&self, job: &Job) -> RepoResult<()> {
        let mut state = self.write()?;
        if state.jobs.contains_key(&job.id) {
            return Err(RepositoryError::Conflict(format!("job {}", job.id)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> RepoResult<()> {
        match self.write()?.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("job {}", job.id))),
        }
    }

    async fn find(&self, id: Uuid) -> RepoResult<Option<Job>> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> RepoResult<Vec<Job>> {
        let state = self.read()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| filter.status.is_none_or(|s| job.status == s))
            .filter(|job| filter.pipeline.as_ref().is_none_or(|p| &job.pipeline == p))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_stalled(&self, cutoff: DateTime<Utc>) -> RepoResult<Vec<Job>> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|job| job.is_stalled(cutoff))
            .cloned()
            .collect())
    }

    async fn is_unit_recorded(&self, job_id: Uuid, unit_id: Uuid) -> RepoResult<bool> {
        Ok(self.read()?.ledger.contains(&(job_id, unit_id)))
    }

    async fn commit_unit(&self, job: &Job, unit: UnitCommit<'_>) -> RepoResult<()> {
        let mut state = self.write()?;

        if !state.jobs.contains_key(&job.id) {
            return Err(RepositoryError::NotFound(format!("job {}", job.id)));
        }
        if !state.ledger.insert((job.id, unit.unit_id)) {
            return Err(RepositoryError::Conflict(format!(
                "outcome of unit {} for job {}",
                unit.unit_id, job.id
            )));
        }

        if let Some(results) = unit.results {
            state
                .detections
                .entry(job.id)
                .or_default()
                .extend(results.detections.iter().cloned());
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn detections(&self, job_id: Uuid) -> RepoResult<Vec<Detection>> {
        Ok(self
            .read()?
            .detections
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Queue
// =============================================================================

#[async_trait]
impl WorkQueue for MemoryStore {
    async fn enqueue(&self, queue_name: &str, unit: &WorkUnit) -> RepoResult<()> {
        let mut state = self.write()?;
        let seq = state.next_seq;
        state.next_seq += 1;

        let queue = state.queues.entry(queue_name.to_string()).or_default();
        if self.queue_capacity.is_some_and(|cap| queue.len() >= cap) {
            return Err(RepositoryError::QueueFull(queue_name.to_string()));
        }

        queue.push(QueuedUnit {
            unit: unit.clone(),
            visible_at: Utc::now(),
            lease_id: None,
            seq,
        });
        Ok(())
    }

    async fn lease(
        &self,
        queue_name: &str,
        _worker_id: &str,
        lease_for: Duration,
    ) -> RepoResult<Option<Lease>> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let now = Utc::now();

        let Some(queue) = state.queues.get_mut(queue_name) else {
            return Ok(None);
        };
        let Some(entry) = queue
            .iter_mut()
            .filter(|entry| entry.visible_at <= now)
            .min_by_key(|entry| (entry.visible_at, entry.seq))
        else {
            return Ok(None);
        };

        let lease_id = Uuid::new_v4();
        let expires_at = deadline(now, lease_for);
        if let Some(stale) = entry.lease_id.replace(lease_id) {
            // Previous lease ran out without ack or nack
            state.leases.remove(&stale);
        }
        entry.visible_at = expires_at;

        let lease = Lease {
            lease_id,
            queue_name: queue_name.to_string(),
            unit: entry.unit.clone(),
            expires_at,
        };
        state.leases.insert(lease_id, queue_name.to_string());
        Ok(Some(lease))
    }

    async fn ack(&self, lease_id: Uuid) -> RepoResult<()> {
        let mut state = self.write()?;
        let queue_name = state
            .leases
            .remove(&lease_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("lease {}", lease_id)))?;

        if let Some(queue) = state.queues.get_mut(&queue_name) {
            queue.retain(|entry| entry.lease_id != Some(lease_id));
        }
        Ok(())
    }

    async fn nack(&self, lease_id: Uuid, delay: Duration) -> RepoResult<()> {
        let mut state = self.write()?;
        let queue_name = state
            .leases
            .remove(&lease_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("lease {}", lease_id)))?;

        let entry = state
            .queues
            .get_mut(&queue_name)
            .and_then(|queue| queue.iter_mut().find(|e| e.lease_id == Some(lease_id)))
            .ok_or_else(|| RepositoryError::NotFound(format!("lease {}", lease_id)))?;

        entry.lease_id = None;
        entry.unit.attempt_count += 1;
        entry.visible_at = deadline(Utc::now(), delay);
        Ok(())
    }
}

// =============================================================================
// Images
// =============================================================================

#[async_trait]
impl ImageRepository for MemoryStore {
    async fn register(&self, urls: Vec<String>) -> RepoResult<Vec<SourceImage>> {
        let mut state = self.write()?;
        let images: Vec<SourceImage> = urls
            .into_iter()
            .map(|url| SourceImage {
                id: Uuid::new_v4(),
                url,
            })
            .collect();
        for image in &images {
            state.images.insert(image.id, image.clone());
        }
        Ok(images)
    }

    async fn create_collection(&self, req: CreateCollection) -> RepoResult<Collection> {
        let mut state = self.write()?;
        if let Some(missing) = req.images.iter().find(|id| !state.images.contains_key(id)) {
            return Err(RepositoryError::NotFound(format!("image {}", missing)));
        }

        let mut seen = HashSet::new();
        let collection = Collection {
            id: Uuid::new_v4(),
            name: req.name,
            images: req.images.into_iter().filter(|id| seen.insert(*id)).collect(),
        };
        state.collections.insert(collection.id, collection.clone());
        Ok(collection)
    }

    async fn expand(&self, target: &TargetScope) -> RepoResult<Vec<SourceImage>> {
        let guard = self.read()?;
        let state = &*guard;
        let from_collections = target
            .collections
            .iter()
            .filter_map(|id| state.collections.get(id))
            .flat_map(|collection| collection.images.iter());

        Ok(dedup_images(
            target
                .images
                .iter()
                .chain(from_collections)
                .filter_map(|id| state.images.get(id).cloned()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(job_id: Uuid) -> WorkUnit {
        WorkUnit::new(job_id, "detector", vec![])
    }

    #[tokio::test]
    async fn test_lease_ack_removes_unit() {
        let store = MemoryStore::new();
        let job_id = Uuid::new_v4();
        store.enqueue("ml-pipeline-detector", &unit(job_id)).await.unwrap();

        let lease = store
            .lease("ml-pipeline-detector", "w1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.unit.job_id, job_id);

        // Leased units are invisible to other consumers
        assert!(store
            .lease("ml-pipeline-detector", "w2", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());

        store.ack(lease.lease_id).await.unwrap();
        assert_eq!(store.queue_depth("ml-pipeline-detector").unwrap(), 0);
        assert!(store.ack(lease.lease_id).await.is_err());
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_attempt_count() {
        let store = MemoryStore::new();
        store.enqueue("q", &unit(Uuid::new_v4())).await.unwrap();

        let first = store.lease("q", "w", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(first.unit.attempt_count, 0);
        store.nack(first.lease_id, Duration::ZERO).await.unwrap();

        let second = store.lease("q", "w", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(second.unit.id, first.unit.id);
        assert_eq!(second.unit.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let store = MemoryStore::new();
        store.enqueue("q", &unit(Uuid::new_v4())).await.unwrap();

        let first = store.lease("q", "w", Duration::ZERO).await.unwrap().unwrap();
        let second = store.lease("q", "w", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(first.unit.id, second.unit.id);

        // The stale lease can no longer settle the unit
        assert!(store.ack(first.lease_id).await.is_err());
        store.ack(second.lease_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let store = MemoryStore::with_queue_capacity(1);
        store.enqueue("q", &unit(Uuid::new_v4())).await.unwrap();
        let err = store.enqueue("q", &unit(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, RepositoryError::QueueFull(_)));
    }

    #[tokio::test]
    async fn test_expand_target() {
        let store = MemoryStore::new();
        let images = store
            .register(vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        let collection = store
            .create_collection(CreateCollection {
                name: "trap-1".into(),
                images: vec![images[2].id, images[0].id],
            })
            .await
            .unwrap();

        let expanded = store
            .expand(&TargetScope {
                images: vec![images[0].id, Uuid::new_v4()],
                collections: vec![collection.id],
            })
            .await
            .unwrap();

        let ids: Vec<Uuid> = expanded.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![images[0].id, images[2].id]);
    }

    #[tokio::test]
    async fn test_commit_unit_conflict_writes_nothing() {
        let store = MemoryStore::new();
        let mut job = Job::new("detector", TargetScope::default());
        store.insert(&job).await.unwrap();
        job.mark_queued(2, Utc::now()).unwrap();
        job.record_unit(true, Utc::now()).unwrap();

        let commit = UnitCommit {
            unit_id: Uuid::new_v4(),
            succeeded: true,
            attempts: 1,
            results: None,
        };
        store.commit_unit(&job, commit).await.unwrap();

        let mut replay = job.clone();
        replay.record_unit(true, Utc::now()).unwrap();
        assert!(matches!(
            store.commit_unit(&replay, commit).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert_eq!(store.find(job.id).await.unwrap().unwrap().progress.completed, 1);
    }
}
