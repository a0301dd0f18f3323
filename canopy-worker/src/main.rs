//! Canopy Worker
//!
//! A stateless consumer that drains one pipeline's queue.
//!
//! Architecture:
//! - Configuration: command line arguments with environment fallbacks
//! - Repositories: HTTP communication with the orchestrator (units, jobs, pipelines)
//! - Services: remote inference on the processing service picked by the liveness monitor
//! - Scheduler: consumer loops that lease, process and settle units
//!
//! The worker resolves its pipeline at boot, then leases units from the
//! pipeline's queue, runs them on a live processing service and reports each
//! outcome to the orchestrator before acknowledging the lease.

mod config;
mod repository;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Args, Config};
use crate::repository::{
    HttpJobRepository, HttpPipelineRepository, HttpUnitRepository, PipelineRepository,
};
use crate::scheduler::UnitConsumer;
use crate::service::RemoteInferenceService;
use canopy_client::{OrchestratorClient, ProcessingServiceClient};
use canopy_core::OrchestrationError;
use canopy_core::domain::pipeline::Pipeline;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Canopy Worker");

    // Load configuration
    let config = Config::from(Args::parse());
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: worker_id={}, pipeline={}, orchestrator_url={}",
        config.worker_id, config.pipeline, config.orchestrator_url
    );

    // Initialize orchestrator client
    let client = Arc::new(OrchestratorClient::new(config.orchestrator_url.clone()));
    let pipelines: Arc<dyn PipelineRepository> = Arc::new(HttpPipelineRepository::new(client.clone()));

    // Resolve the pipeline (with retry logic)
    let pipeline = resolve_with_retry(pipelines.as_ref(), &config.pipeline).await?;
    info!(
        "Serving pipeline {} from queue {}",
        pipeline.name, pipeline.queue_name
    );

    // Initialize repositories and services
    let units = Arc::new(HttpUnitRepository::new(
        client.clone(),
        pipeline.queue_name.clone(),
        config.worker_id.clone(),
    ));
    let jobs = Arc::new(HttpJobRepository::new(client));
    let inference = Arc::new(RemoteInferenceService::new(
        pipelines,
        ProcessingServiceClient::new(config.inference_timeout, config.inference_timeout),
    ));

    let consumer = UnitConsumer::new(units, jobs, inference, config.retry, config.poll_interval);

    info!(
        "Inference timeout: {:?}, max attempts: {}",
        config.inference_timeout, config.retry.max_attempts
    );

    if let Err(e) = consumer.run(config.concurrency).await {
        error!("Consumer error: {:#}", e);
        return Err(e);
    }

    Ok(())
}

/// Resolves the pipeline with retry logic and exponential backoff
///
/// Connection errors are retried since the orchestrator may still be
/// starting. An unregistered pipeline is a configuration error and ends the
/// worker at once.
async fn resolve_with_retry(pipelines: &dyn PipelineRepository, name: &str) -> Result<Pipeline> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match pipelines.resolve(name).await {
            Ok(pipeline) => {
                if attempt > 1 {
                    info!("Resolved pipeline after {} attempt(s)", attempt);
                }
                return Ok(pipeline);
            }
            Err(e) if e.is_not_found() => {
                error!("Pipeline '{}' is not registered", name);
                return Err(OrchestrationError::UnknownPipeline(name.to_string()).into());
            }
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                warn!(
                    "Failed to reach orchestrator (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
            Err(e) => {
                error!("Failed to resolve pipeline after {} attempt(s)", attempt);
                return Err(e).context(format!("Failed to resolve pipeline '{}'", name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use canopy_client::ClientError;
    use canopy_core::dto::registry::ServiceSelection;
    use std::sync::Mutex;

    /// Fails with the scripted errors, then resolves
    struct FlakyRegistry {
        errors: Mutex<Vec<ClientError>>,
    }

    #[async_trait]
    impl PipelineRepository for FlakyRegistry {
        async fn resolve(&self, name: &str) -> canopy_client::Result<Pipeline> {
            match self.errors.lock().unwrap().pop() {
                Some(err) => Err(err),
                None => Ok(Pipeline::new(name, None).unwrap()),
            }
        }

        async fn select_service(&self, _name: &str) -> canopy_client::Result<Option<ServiceSelection>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_resolve_retries_unavailable_orchestrator() {
        let registry = FlakyRegistry {
            errors: Mutex::new(vec![
                ClientError::api_error(503, "starting"),
                ClientError::api_error(502, "bad gateway"),
            ]),
        };

        let pipeline = resolve_with_retry(&registry, "detector").await.unwrap();
        assert_eq!(pipeline.queue_name, "ml-pipeline-detector");
        assert!(registry.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_fatal() {
        let registry = FlakyRegistry {
            errors: Mutex::new(vec![ClientError::api_error(404, "pipeline 'foo-bar' not found")]),
        };

        let err = resolve_with_retry(&registry, "foo-bar").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<OrchestrationError>(),
            Some(&OrchestrationError::UnknownPipeline("foo-bar".to_string()))
        );
    }
}
