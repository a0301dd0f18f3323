//! Shared application state
//!
//! Wires the repositories selected at startup into the services handed to
//! every request handler and background loop.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::OrchestratorConfig;
use crate::repository::{
    ImageRepository, JobRepository, MemoryStore, PgImageRepository, PgJobRepository,
    PgRegistryRepository, PgWorkQueue, RegistryRepository, WorkQueue,
};
use crate::service::dispatch::DispatchOptions;
use crate::service::{
    Dispatcher, JobLocks, JobService, LivenessMonitor, QueueService, Reconciler, RegistryService,
    Watchdog,
};

/// Repository implementations backing one orchestrator
#[derive(Clone)]
pub struct Store {
    pub registry: Arc<dyn RegistryRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub queue: Arc<dyn WorkQueue>,
    pub images: Arc<dyn ImageRepository>,
}

impl Store {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            registry: Arc::new(PgRegistryRepository::new(pool.clone())),
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            queue: Arc::new(PgWorkQueue::new(pool.clone())),
            images: Arc::new(PgImageRepository::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            registry: store.clone(),
            jobs: store.clone(),
            queue: store.clone(),
            images: store,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryService>,
    pub monitor: LivenessMonitor,
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<JobService>,
    pub reconciler: Arc<Reconciler>,
    pub queue: Arc<QueueService>,
    pub watchdog: Arc<Watchdog>,
    pub images: Arc<dyn ImageRepository>,
}

impl AppState {
    pub fn new(store: Store, config: &OrchestratorConfig) -> Self {
        let locks = JobLocks::new();
        let monitor = LivenessMonitor::new(
            store.registry.clone(),
            config.probe_timeout,
            config.liveness_threshold,
        );

        Self {
            registry: Arc::new(RegistryService::new(
                store.registry.clone(),
                config.probe_timeout,
                config.liveness_threshold,
            )),
            dispatcher: Arc::new(Dispatcher::new(
                store.registry.clone(),
                store.jobs.clone(),
                store.queue.clone(),
                store.images.clone(),
                monitor.clone(),
                locks.clone(),
                DispatchOptions {
                    batch_size: config.batch_size,
                    preflight: config.preflight,
                },
            )),
            jobs: Arc::new(JobService::new(store.jobs.clone(), locks.clone())),
            reconciler: Arc::new(Reconciler::new(store.jobs.clone(), locks.clone())),
            queue: Arc::new(QueueService::new(store.queue, config.lease_duration)),
            watchdog: Arc::new(Watchdog::new(store.jobs, locks, config.stall_timeout)),
            images: store.images,
            monitor,
        }
    }
}
