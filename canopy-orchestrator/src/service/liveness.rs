//! Liveness Monitor
//!
//! Probes every processing service's `/livez` on a fixed interval,
//! independently of job traffic, and answers service selection queries from
//! the recorded liveness triples.

use std::sync::Arc;
use std::time::{Duration, Instant};

use canopy_client::ProcessingServiceClient;
use canopy_core::domain::backend::{ProbeResult, ProcessingService};
use canopy_core::dto::registry::ServiceSelection;
use chrono::Utc;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::isolation::run_isolated;
use crate::repository::{RegistryRepository, RepoResult};

#[derive(Clone)]
pub struct LivenessMonitor {
    registry: Arc<dyn RegistryRepository>,
    probe_timeout: Duration,
    threshold: Duration,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<dyn RegistryRepository>,
        probe_timeout: Duration,
        threshold: Duration,
    ) -> Self {
        Self {
            registry,
            probe_timeout,
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    fn client(&self) -> ProcessingServiceClient {
        ProcessingServiceClient::new(self.probe_timeout, self.probe_timeout)
    }

    /// Stores a probe result against the current row, never a snapshot.
    ///
    /// A failure only advances `last_seen`, so a success recorded while this
    /// probe was in flight survives.
    async fn record(&self, service_id: Uuid, probe: &ProbeResult) -> RepoResult<()> {
        let at = Utc::now();
        if probe.reachable {
            self.registry
                .record_probe_success(service_id, at, probe.latency)
                .await
        } else {
            self.registry.record_probe_failure(service_id, at).await
        }
    }

    /// Probes one service on the current runtime.
    ///
    /// Returns `None` without touching the store when the service has no
    /// endpoint.
    pub async fn probe(&self, service: &ProcessingService) -> RepoResult<Option<ProbeResult>> {
        let Some(endpoint) = service.endpoint_url.as_deref() else {
            return Ok(None);
        };

        let probe = probe_endpoint(&self.client(), endpoint).await;
        if !probe.reachable {
            tracing::warn!(
                "Service {} ({}) unreachable: {}",
                service.name,
                service.id,
                probe.error.as_deref().unwrap_or("unknown error")
            );
        }

        self.record(service.id, &probe).await?;
        Ok(Some(probe))
    }

    /// Probes every service with an endpoint concurrently.
    ///
    /// Returns how many services were probed.
    pub async fn probe_all(&self) -> RepoResult<usize> {
        let graph = self.registry.load_graph().await?;
        let mut probes = JoinSet::new();

        for service in graph.services().filter(|s| s.endpoint_url.is_some()) {
            let monitor = self.clone();
            let service = service.clone();
            probes.spawn(async move { monitor.probe(&service).await });
        }

        let mut probed = 0;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Ok(Some(_))) => probed += 1,
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::error!("Failed to record liveness: {}", e),
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }

        Ok(probed)
    }

    /// Probe loop; runs until the task is dropped
    pub async fn run(self, interval: Duration) {
        tracing::info!("Liveness monitor probing every {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.probe_all().await {
                Ok(probed) => tracing::debug!("Probe cycle done: {} service(s)", probed),
                Err(e) => tracing::error!("Probe cycle failed: {}", e),
            }
        }
    }

    /// On-demand probe from a request handler, run in an isolated runtime
    pub async fn probe_now(&self, service_id: Uuid) -> ServiceResult<ProbeResult> {
        let service = self
            .registry
            .find_service(service_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("service {}", service_id)))?;
        let endpoint = service.endpoint_url.clone().ok_or_else(|| {
            ServiceError::InvalidRequest(format!("service {} has no endpoint", service_id))
        })?;

        let client = self.client();
        let probe = run_isolated(move || async move { probe_endpoint(&client, &endpoint).await })
            .await?;

        self.record(service.id, &probe).await?;
        Ok(probe)
    }

    /// Best fresh service for a pipeline, or `None` if every candidate is
    /// stale or unassigned
    pub async fn select_service(&self, pipeline: &str) -> ServiceResult<Option<ServiceSelection>> {
        let graph = self.registry.load_graph().await?;
        let selected = graph.select_for(pipeline, Utc::now(), self.threshold)?;

        Ok(selected.and_then(|service| {
            Some(ServiceSelection {
                service_id: service.id,
                endpoint_url: service.endpoint_url.clone()?,
                latency: service.liveness.last_seen_latency,
            })
        }))
    }

    /// Checks that the pipeline has a reachable service right now.
    ///
    /// Probes the selected service, or every candidate when none is fresh,
    /// each in an isolated runtime.
    pub async fn preflight(&self, pipeline: &str) -> ServiceResult<bool> {
        if let Some(selection) = self.select_service(pipeline).await? {
            return Ok(self.probe_now(selection.service_id).await?.reachable);
        }

        let graph = self.registry.load_graph().await?;
        let pipeline = graph.resolve(pipeline)?;
        let candidates: Vec<Uuid> = graph
            .services_for(pipeline.id)
            .into_iter()
            .filter(|s| s.endpoint_url.is_some())
            .map(|s| s.id)
            .collect();

        for service_id in candidates {
            if self.probe_now(service_id).await?.reachable {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// `GET {endpoint}/livez`, folded into a probe result
async fn probe_endpoint(client: &ProcessingServiceClient, endpoint: &str) -> ProbeResult {
    let started = Instant::now();
    match client.livez(endpoint).await {
        Ok(latency) => ProbeResult::reachable(latency),
        Err(e) => ProbeResult::unreachable(started.elapsed(), e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use crate::service::testing::{THRESHOLD, register_pipeline};
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use canopy_core::domain::backend::{Backend, Liveness};

    async fn serve_livez(status: StatusCode) -> String {
        let app = Router::new().route("/livez", get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    fn monitor(store: &Arc<MemoryStore>) -> LivenessMonitor {
        LivenessMonitor::new(store.clone(), Duration::from_secs(2), THRESHOLD)
    }

    #[tokio::test]
    async fn test_probe_all_records_liveness() {
        let store = Arc::new(MemoryStore::new());
        let live = serve_livez(StatusCode::OK).await;
        let sick = serve_livez(StatusCode::SERVICE_UNAVAILABLE).await;

        let backend = Backend::new("gpu");
        store.create_backend(&backend).await.unwrap();
        let up = ProcessingService::new("up", backend.id, Some(live));
        let down = ProcessingService::new("down", backend.id, Some(sick));
        let unassigned = ProcessingService::new("unassigned", backend.id, None);
        for service in [&up, &down, &unassigned] {
            store.create_service(service).await.unwrap();
        }

        let probed = monitor(&store).probe_all().await.unwrap();
        assert_eq!(probed, 2);

        let up = store.find_service(up.id).await.unwrap().unwrap();
        assert!(up.liveness.last_seen_live.is_some());
        assert!(up.liveness.last_seen_live <= up.liveness.last_seen);
        assert!(up.liveness.last_seen_latency.is_some());

        let down = store.find_service(down.id).await.unwrap().unwrap();
        assert!(down.liveness.last_seen.is_some());
        assert!(down.liveness.last_seen_live.is_none());

        let unassigned = store.find_service(unassigned.id).await.unwrap().unwrap();
        assert_eq!(unassigned.liveness, Liveness::default());
    }

    #[tokio::test]
    async fn test_failed_probe_keeps_last_live() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = register_pipeline(&store, "detector", "http://127.0.0.1:9").await;
        let graph = store.load_graph().await.unwrap();
        let service = graph.services_for(pipeline.id)[0].clone();
        let before = service.liveness;

        let probe = monitor(&store).probe_now(service.id).await.unwrap();
        assert!(!probe.reachable);

        let after = store.find_service(service.id).await.unwrap().unwrap().liveness;
        assert_eq!(after.last_seen_live, before.last_seen_live);
        assert!(after.last_seen > before.last_seen);
    }

    #[tokio::test]
    async fn test_unreachable_result_keeps_newer_success() {
        let store = Arc::new(MemoryStore::new());
        let backend = Backend::new("gpu");
        store.create_backend(&backend).await.unwrap();
        let snapshot =
            ProcessingService::new("flaky", backend.id, Some("http://127.0.0.1:9".into()));
        store.create_service(&snapshot).await.unwrap();

        // Lands after the snapshot was taken, before its check completes
        let live_at = Utc::now();
        store
            .record_probe_success(snapshot.id, live_at, Duration::from_millis(12))
            .await
            .unwrap();

        let result = monitor(&store).probe(&snapshot).await.unwrap().unwrap();
        assert!(!result.reachable);

        let after = store.find_service(snapshot.id).await.unwrap().unwrap().liveness;
        assert_eq!(after.last_seen_live, Some(live_at));
        assert_eq!(after.last_seen_latency, Some(Duration::from_millis(12)));
        assert!(after.last_seen >= Some(live_at));
    }

    #[tokio::test]
    async fn test_select_service_unknown_pipeline() {
        let store = Arc::new(MemoryStore::new());
        assert!(matches!(
            monitor(&store).select_service("foo-bar").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_select_service_skips_stale() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = register_pipeline(&store, "detector", "http://svc.local").await;
        let service_id = store.load_graph().await.unwrap().services_for(pipeline.id)[0].id;

        let selected = monitor(&store).select_service("detector").await.unwrap().unwrap();
        assert_eq!(selected.service_id, service_id);

        let stale = Utc::now() - chrono::Duration::seconds(600);
        store
            .record_probe_success(service_id, stale, Duration::from_millis(5))
            .await
            .unwrap();
        store.record_probe_failure(service_id, Utc::now()).await.unwrap();
        assert!(monitor(&store).select_service("detector").await.unwrap().is_none());
    }
}
