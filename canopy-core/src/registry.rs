//! Registry graph
//!
//! In-memory view of the Pipeline / Backend / ProcessingService relations.
//! Relations are adjacency sets keyed by stable ids rather than object
//! references, so routing and liveness logic can run without a database.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::backend::{Backend, Liveness, ProcessingService, select_service};
use crate::domain::pipeline::Pipeline;
use crate::error::CoreError;

#[derive(Debug, Clone, Default)]
pub struct RegistryGraph {
    pipelines: BTreeMap<Uuid, Pipeline>,
    pipelines_by_name: HashMap<String, Uuid>,
    backends: BTreeMap<Uuid, Backend>,
    services: BTreeMap<Uuid, ProcessingService>,
}

impl RegistryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a pipeline up by name
    pub fn resolve(&self, name: &str) -> Result<&Pipeline, CoreError> {
        self.pipelines_by_name
            .get(name)
            .and_then(|id| self.pipelines.get(id))
            .ok_or_else(|| CoreError::UnknownPipeline(name.to_string()))
    }

    pub fn pipeline(&self, id: Uuid) -> Option<&Pipeline> {
        self.pipelines.get(&id)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }

    pub fn backend(&self, id: Uuid) -> Option<&Backend> {
        self.backends.get(&id)
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.backends.values()
    }

    pub fn service(&self, id: Uuid) -> Option<&ProcessingService> {
        self.services.get(&id)
    }

    pub fn services(&self) -> impl Iterator<Item = &ProcessingService> {
        self.services.values()
    }

    /// Adds a pipeline; returns `false` if the name is already taken
    pub fn insert_pipeline(&mut self, pipeline: Pipeline) -> bool {
        if self.pipelines_by_name.contains_key(&pipeline.name) {
            return false;
        }
        self.pipelines_by_name
            .insert(pipeline.name.clone(), pipeline.id);
        self.pipelines.insert(pipeline.id, pipeline);
        true
    }

    /// Adds a backend; returns `false` if the name is already taken
    pub fn insert_backend(&mut self, backend: Backend) -> bool {
        if self.backends.values().any(|b| b.name == backend.name) {
            return false;
        }
        self.backends.insert(backend.id, backend);
        true
    }

    /// Adds a service; returns `false` if its backend does not exist
    pub fn insert_service(&mut self, service: ProcessingService) -> bool {
        if !self.backends.contains_key(&service.backend_id) {
            return false;
        }
        self.services.insert(service.id, service);
        true
    }

    /// Records that `backend_id` can run `pipeline_id`, on both sides.
    ///
    /// Returns `false` if either end is missing.
    pub fn link(&mut self, backend_id: Uuid, pipeline_id: Uuid) -> bool {
        let (Some(backend), Some(pipeline)) = (
            self.backends.get_mut(&backend_id),
            self.pipelines.get_mut(&pipeline_id),
        ) else {
            return false;
        };
        backend.pipelines.insert(pipeline_id);
        pipeline.backends.insert(backend_id);
        pipeline.updated_at = Utc::now();
        true
    }

    /// Assigns or clears the endpoint.
    ///
    /// A changed endpoint starts with an empty liveness triple: what the old
    /// URL earned says nothing about the new one.
    pub fn set_endpoint(&mut self, service_id: Uuid, endpoint_url: Option<String>) -> bool {
        match self.services.get_mut(&service_id) {
            Some(service) => {
                if service.endpoint_url != endpoint_url {
                    service.liveness = Liveness::default();
                }
                service.endpoint_url = endpoint_url;
                true
            }
            None => false,
        }
    }

    /// Applies `update` to the stored liveness triple in place
    pub fn update_liveness(
        &mut self,
        service_id: Uuid,
        update: impl FnOnce(&mut Liveness),
    ) -> bool {
        match self.services.get_mut(&service_id) {
            Some(service) => {
                update(&mut service.liveness);
                true
            }
            None => false,
        }
    }

    /// Services of every backend registered for the pipeline
    pub fn services_for(&self, pipeline_id: Uuid) -> Vec<&ProcessingService> {
        let Some(pipeline) = self.pipelines.get(&pipeline_id) else {
            return Vec::new();
        };
        self.services
            .values()
            .filter(|service| pipeline.backends.contains(&service.backend_id))
            .collect()
    }

    /// Best service for a pipeline by name, if any is fresh
    pub fn select_for(
        &self,
        pipeline_name: &str,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Option<&ProcessingService>, CoreError> {
        let pipeline = self.resolve(pipeline_name)?;
        Ok(select_service(self.services_for(pipeline.id), now, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::queue_name_for;
    use std::collections::HashSet;

    const THRESHOLD: Duration = Duration::from_secs(120);

    fn graph_with_detector() -> (RegistryGraph, Uuid, Uuid) {
        let mut graph = RegistryGraph::new();
        let pipeline = Pipeline::new("detector", None).unwrap();
        let backend = Backend::new("gpu-pool");
        let (pipeline_id, backend_id) = (pipeline.id, backend.id);

        assert!(graph.insert_pipeline(pipeline));
        assert!(graph.insert_backend(backend));
        assert!(graph.link(backend_id, pipeline_id));
        (graph, pipeline_id, backend_id)
    }

    fn probed(graph: &mut RegistryGraph, service: ProcessingService, latency_ms: u64) -> Uuid {
        let id = service.id;
        assert!(graph.insert_service(service));
        let latency = Duration::from_millis(latency_ms);
        assert!(graph.update_liveness(id, |l| l.record_success(Utc::now(), latency)));
        id
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let (graph, pipeline_id, _) = graph_with_detector();
        assert_eq!(graph.resolve("detector").unwrap().id, pipeline_id);
        assert_eq!(
            graph.resolve("foo-bar").unwrap_err(),
            CoreError::UnknownPipeline("foo-bar".to_string())
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let (mut graph, _, _) = graph_with_detector();
        assert!(!graph.insert_pipeline(Pipeline::new("detector", None).unwrap()));
        assert!(!graph.insert_backend(Backend::new("gpu-pool")));
    }

    #[test]
    fn test_queue_names_unique_across_registry() {
        let mut graph = RegistryGraph::new();
        for name in ["detector", "species-classifier", "binary-moth", "tracking"] {
            assert!(graph.insert_pipeline(Pipeline::new(name, None).unwrap()));
        }

        let queues: HashSet<String> = graph.pipelines().map(|p| p.queue_name.clone()).collect();
        assert_eq!(queues.len(), 4);
        for pipeline in graph.pipelines() {
            assert_eq!(pipeline.queue_name, queue_name_for(&pipeline.name));
        }
    }

    #[test]
    fn test_link_is_bidirectional() {
        let (graph, pipeline_id, backend_id) = graph_with_detector();
        assert!(graph.backend(backend_id).unwrap().pipelines.contains(&pipeline_id));
        assert!(graph.pipeline(pipeline_id).unwrap().backends.contains(&backend_id));
    }

    #[test]
    fn test_services_for_follows_backends() {
        let (mut graph, pipeline_id, backend_id) = graph_with_detector();
        let other_backend = Backend::new("cpu-pool");
        let other_id = other_backend.id;
        graph.insert_backend(other_backend);

        let inside = ProcessingService::new("a", backend_id, Some("http://a".into()));
        let outside = ProcessingService::new("b", other_id, Some("http://b".into()));
        let inside_id = inside.id;
        graph.insert_service(inside);
        graph.insert_service(outside);

        let ids: Vec<Uuid> = graph.services_for(pipeline_id).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![inside_id]);
    }

    #[test]
    fn test_service_requires_existing_backend() {
        let mut graph = RegistryGraph::new();
        let orphan = ProcessingService::new("orphan", Uuid::new_v4(), None);
        assert!(!graph.insert_service(orphan));
    }

    #[test]
    fn test_select_for_pipeline() {
        let (mut graph, _, backend_id) = graph_with_detector();
        probed(
            &mut graph,
            ProcessingService::new("slow", backend_id, Some("http://slow".into())),
            300,
        );
        let fast = probed(
            &mut graph,
            ProcessingService::new("fast", backend_id, Some("http://fast".into())),
            12,
        );

        let chosen = graph.select_for("detector", Utc::now(), THRESHOLD).unwrap();
        assert_eq!(chosen.map(|s| s.id), Some(fast));

        // Clearing the endpoint makes the fast service ineligible
        assert!(graph.set_endpoint(fast, None));
        let chosen = graph.select_for("detector", Utc::now(), THRESHOLD).unwrap();
        assert_ne!(chosen.map(|s| s.id), Some(fast));

        assert!(graph.select_for("foo-bar", Utc::now(), THRESHOLD).is_err());
    }

    #[test]
    fn test_changed_endpoint_resets_liveness() {
        let (mut graph, _, backend_id) = graph_with_detector();
        let id = probed(
            &mut graph,
            ProcessingService::new("svc", backend_id, Some("http://old".into())),
            15,
        );

        // Same URL keeps its history
        assert!(graph.set_endpoint(id, Some("http://old".into())));
        assert!(graph.service(id).unwrap().liveness.last_seen_live.is_some());

        assert!(graph.set_endpoint(id, Some("http://new".into())));
        assert_eq!(graph.service(id).unwrap().liveness, Liveness::default());
        assert!(graph.select_for("detector", Utc::now(), THRESHOLD).unwrap().is_none());
    }
}
