//! Registry Service
//!
//! Administration of pipelines, backends and processing services, and
//! registration sync from a service's advertised pipelines.

use std::sync::Arc;
use std::time::Duration;

use canopy_client::ProcessingServiceClient;
use canopy_core::domain::backend::{Backend, ProcessingService};
use canopy_core::domain::pipeline::Pipeline;
use canopy_core::dto::registry::{
    CreateBackend, CreatePipeline, RegisterService, ServiceSummary, SetEndpoint, SyncReport,
};
use chrono::Utc;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::isolation::run_isolated;
use crate::repository::{RegistryRepository, RepositoryError};

pub struct RegistryService {
    repo: Arc<dyn RegistryRepository>,
    probe_timeout: Duration,
    liveness_threshold: Duration,
}

impl RegistryService {
    pub fn new(
        repo: Arc<dyn RegistryRepository>,
        probe_timeout: Duration,
        liveness_threshold: Duration,
    ) -> Self {
        Self {
            repo,
            probe_timeout,
            liveness_threshold,
        }
    }

    fn summarize(&self, service: ProcessingService) -> ServiceSummary {
        ServiceSummary::from_service(service, Utc::now(), self.liveness_threshold)
    }

    /// Create a new pipeline
    pub async fn create_pipeline(&self, req: CreatePipeline) -> ServiceResult<Pipeline> {
        let pipeline = Pipeline::new(req.name, req.description)?;
        self.repo.create_pipeline(&pipeline).await?;

        tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.queue_name);
        Ok(pipeline)
    }

    /// Resolve a pipeline by name
    pub async fn get_pipeline(&self, name: &str) -> ServiceResult<Pipeline> {
        self.repo
            .find_pipeline(name)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("pipeline '{}'", name)))
    }

    pub async fn list_pipelines(&self) -> ServiceResult<Vec<Pipeline>> {
        let graph = self.repo.load_graph().await?;
        Ok(graph.pipelines().cloned().collect())
    }

    pub async fn create_backend(&self, req: CreateBackend) -> ServiceResult<Backend> {
        validate_name("backend", &req.name)?;
        let backend = Backend::new(req.name);
        self.repo.create_backend(&backend).await?;

        tracing::info!("Backend created: {} ({})", backend.name, backend.id);
        Ok(backend)
    }

    pub async fn list_backends(&self) -> ServiceResult<Vec<Backend>> {
        let graph = self.repo.load_graph().await?;
        Ok(graph.backends().cloned().collect())
    }

    /// Registers `backend_id` as able to run `pipeline_id`
    pub async fn link_backend(&self, backend_id: Uuid, pipeline_id: Uuid) -> ServiceResult<Backend> {
        self.repo.link_backend(backend_id, pipeline_id).await?;

        let graph = self.repo.load_graph().await?;
        let backend = graph
            .backend(backend_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("backend {}", backend_id)))?;

        tracing::info!("Backend {} linked to pipeline {}", backend.name, pipeline_id);
        Ok(backend)
    }

    pub async fn register_service(&self, req: RegisterService) -> ServiceResult<ServiceSummary> {
        validate_name("service", &req.name)?;
        if let Some(url) = &req.endpoint_url {
            validate_endpoint(url)?;
        }

        let service = ProcessingService::new(req.name, req.backend_id, req.endpoint_url);
        self.repo.create_service(&service).await?;

        tracing::info!(
            "Processing service registered: {} ({}) on backend {}",
            service.name,
            service.id,
            service.backend_id
        );
        Ok(self.summarize(service))
    }

    pub async fn list_services(&self) -> ServiceResult<Vec<ServiceSummary>> {
        let graph = self.repo.load_graph().await?;
        Ok(graph.services().cloned().map(|s| self.summarize(s)).collect())
    }

    /// Assigns or clears a service's endpoint
    pub async fn set_endpoint(&self, id: Uuid, req: SetEndpoint) -> ServiceResult<ServiceSummary> {
        if let Some(url) = &req.endpoint_url {
            validate_endpoint(url)?;
        }
        self.repo.set_endpoint(id, req.endpoint_url.clone()).await?;

        match &req.endpoint_url {
            Some(url) => tracing::info!("Service {} endpoint set to {}", id, url),
            None => tracing::info!("Service {} endpoint cleared", id),
        }

        let service = self
            .repo
            .find_service(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("service {}", id)))?;
        Ok(self.summarize(service))
    }

    /// Creates and links every pipeline the service advertises on `/info`.
    ///
    /// The `/info` call runs in an isolated runtime.
    pub async fn sync_service(&self, id: Uuid) -> ServiceResult<SyncReport> {
        let service = self
            .repo
            .find_service(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("service {}", id)))?;
        let endpoint = service.endpoint_url.clone().ok_or_else(|| {
            ServiceError::InvalidRequest(format!("service {} has no endpoint", id))
        })?;

        let timeout = self.probe_timeout;
        let info = run_isolated(move || async move {
            ProcessingServiceClient::new(timeout, timeout)
                .info(&endpoint)
                .await
        })
        .await??;

        let graph = self.repo.load_graph().await?;
        let mut report = SyncReport::default();

        for advertised in info.pipelines {
            let pipeline = match graph.resolve(&advertised.name) {
                Ok(existing) if existing.backends.contains(&service.backend_id) => {
                    report.unchanged.push(advertised.name);
                    continue;
                }
                Ok(existing) => {
                    report.linked.push(advertised.name);
                    existing.clone()
                }
                Err(_) => {
                    let pipeline = match Pipeline::new(&advertised.name, advertised.description) {
                        Ok(pipeline) => pipeline,
                        Err(e) => {
                            tracing::warn!("Skipping pipeline advertised by {}: {}", service.name, e);
                            continue;
                        }
                    };
                    match self.repo.create_pipeline(&pipeline).await {
                        Ok(()) => {
                            report.created.push(advertised.name);
                            pipeline
                        }
                        // Created concurrently by someone else
                        Err(RepositoryError::Conflict(_)) => {
                            let existing = self.get_pipeline(&advertised.name).await?;
                            report.linked.push(advertised.name);
                            existing
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            self.repo.link_backend(service.backend_id, pipeline.id).await?;
        }

        tracing::info!(
            "Synced service {}: {} created, {} linked, {} unchanged",
            service.name,
            report.created.len(),
            report.linked.len(),
            report.unchanged.len()
        );
        Ok(report)
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_name(kind: &str, name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(format!("{} name cannot be empty", kind)));
    }
    Ok(())
}

fn validate_endpoint(url: &str) -> ServiceResult<()> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));

    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ServiceError::InvalidRequest(format!(
            "endpoint '{}' must be an http(s) URL",
            url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use crate::service::LivenessMonitor;
    use crate::service::testing::{THRESHOLD, register_pipeline};
    use axum::{Json, Router, routing::get};
    use canopy_core::domain::backend::ServiceStatus;
    use canopy_core::dto::processing::{PipelineInfo, ServiceInfo};

    fn service(store: &Arc<MemoryStore>) -> RegistryService {
        RegistryService::new(store.clone(), Duration::from_secs(2), THRESHOLD)
    }

    async fn serve_info(pipelines: &[&str]) -> String {
        let info = ServiceInfo {
            name: "ami-ml".into(),
            description: None,
            pipelines: pipelines
                .iter()
                .map(|name| PipelineInfo {
                    name: name.to_string(),
                    description: None,
                })
                .collect(),
        };
        let app = Router::new().route("/info", get(move || async move { Json(info) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("http://ml.local:2000").is_ok());
        assert!(validate_endpoint("https://ml.example").is_ok());
        assert!(validate_endpoint("ml.local:2000").is_err());
        assert!(validate_endpoint("http://").is_err());
    }

    #[test]
    fn test_validate_empty_name() {
        assert!(validate_name("backend", "  ").is_err());
        assert!(validate_name("backend", "gpu-a").is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_pipeline_is_conflict() {
        let store = Arc::new(MemoryStore::new());
        let registry = service(&store);
        let req = CreatePipeline {
            name: "detector".into(),
            description: None,
        };

        registry.create_pipeline(req.clone()).await.unwrap();
        assert!(matches!(
            registry.create_pipeline(req).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_pipeline_name() {
        let store = Arc::new(MemoryStore::new());
        let result = service(&store)
            .create_pipeline(CreatePipeline {
                name: "Moth Detector".into(),
                description: None,
            })
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_link_and_list() {
        let store = Arc::new(MemoryStore::new());
        let registry = service(&store);
        let pipeline = registry
            .create_pipeline(CreatePipeline {
                name: "detector".into(),
                description: Some("moth detector".into()),
            })
            .await
            .unwrap();
        let backend = registry
            .create_backend(CreateBackend { name: "gpu".into() })
            .await
            .unwrap();

        let linked = registry.link_backend(backend.id, pipeline.id).await.unwrap();
        assert!(linked.pipelines.contains(&pipeline.id));
        assert!(registry
            .get_pipeline("detector")
            .await
            .unwrap()
            .backends
            .contains(&backend.id));

        assert!(matches!(
            registry.link_backend(backend.id, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_service_creates_and_links() {
        let store = Arc::new(MemoryStore::new());
        let registry = service(&store);
        let endpoint = serve_info(&["detector", "classifier", "Bad Name"]).await;

        registry
            .create_pipeline(CreatePipeline {
                name: "detector".into(),
                description: None,
            })
            .await
            .unwrap();
        let backend = registry
            .create_backend(CreateBackend { name: "gpu".into() })
            .await
            .unwrap();
        let svc = registry
            .register_service(RegisterService {
                name: "ami-ml".into(),
                backend_id: backend.id,
                endpoint_url: Some(endpoint),
            })
            .await
            .unwrap();

        let report = registry.sync_service(svc.id).await.unwrap();
        assert_eq!(report.created, vec!["classifier".to_string()]);
        assert_eq!(report.linked, vec!["detector".to_string()]);
        assert!(report.unchanged.is_empty());

        let again = registry.sync_service(svc.id).await.unwrap();
        assert_eq!(again.unchanged.len(), 2);
    }

    #[tokio::test]
    async fn test_repointed_service_is_not_selectable() {
        let store = Arc::new(MemoryStore::new());
        let registry = service(&store);
        let monitor = LivenessMonitor::new(store.clone(), Duration::from_secs(2), THRESHOLD);
        let pipeline = register_pipeline(&store, "detector", "http://ml-a.local").await;
        let id = store.load_graph().await.unwrap().services_for(pipeline.id)[0].id;

        let unchanged = registry
            .set_endpoint(
                id,
                SetEndpoint {
                    endpoint_url: Some("http://ml-a.local".into()),
                },
            )
            .await
            .unwrap();
        assert!(unchanged.last_seen_live.is_some());
        assert!(monitor.select_service("detector").await.unwrap().is_some());

        let moved = registry
            .set_endpoint(
                id,
                SetEndpoint {
                    endpoint_url: Some("http://ml-b.local".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.status, ServiceStatus::Unknown);
        assert!(moved.last_seen.is_none());
        assert!(moved.last_seen_live.is_none());
        assert!(moved.last_seen_latency.is_none());
        assert!(monitor.select_service("detector").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_without_endpoint() {
        let store = Arc::new(MemoryStore::new());
        let registry = service(&store);
        let backend = registry
            .create_backend(CreateBackend { name: "gpu".into() })
            .await
            .unwrap();
        let svc = registry
            .register_service(RegisterService {
                name: "pending".into(),
                backend_id: backend.id,
                endpoint_url: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            registry.sync_service(svc.id).await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }
}
