//! Registry Repository
//!
//! Postgres storage for pipelines, backends and processing services.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::domain::backend::{Backend, Liveness, ProcessingService};
use canopy_core::domain::pipeline::Pipeline;
use canopy_core::registry::RegistryGraph;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RegistryRepository, RepoResult, RepositoryError};

pub struct PgRegistryRepository {
    pool: PgPool,
}

impl PgRegistryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistryRepository for PgRegistryRepository {
    async fn load_graph(&self) -> RepoResult<RegistryGraph> {
        let pipelines = sqlx::query_as::<_, PipelineRow>(
            "SELECT id, name, description, queue_name, created_at, updated_at FROM pipelines",
        )
        .fetch_all(&self.pool)
        .await?;

        let backends = sqlx::query_as::<_, BackendRow>(
            "SELECT id, name, created_at FROM backends",
        )
        .fetch_all(&self.pool)
        .await?;

        let links = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT backend_id, pipeline_id FROM backend_pipelines",
        )
        .fetch_all(&self.pool)
        .await?;

        let services = sqlx::query_as::<_, ServiceRow>(SELECT_SERVICES)
            .fetch_all(&self.pool)
            .await?;

        let mut graph = RegistryGraph::new();
        for row in pipelines {
            graph.insert_pipeline(row.into());
        }
        for row in backends {
            graph.insert_backend(row.into());
        }
        for (backend_id, pipeline_id) in links {
            graph.link(backend_id, pipeline_id);
        }
        for row in services {
            graph.insert_service(row.into());
        }

        Ok(graph)
    }

    async fn find_pipeline(&self, name: &str) -> RepoResult<Option<Pipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            r#"
            SELECT id, name, description, queue_name, created_at, updated_at
            FROM pipelines
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let backends = sqlx::query_scalar::<_, Uuid>(
            "SELECT backend_id FROM backend_pipelines WHERE pipeline_id = $1",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let mut pipeline: Pipeline = row.into();
        pipeline.backends = backends.into_iter().collect();
        Ok(Some(pipeline))
    }

    async fn create_pipeline(&self, pipeline: &Pipeline) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, description, queue_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(&pipeline.queue_name)
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, format!("pipeline '{}'", pipeline.name)))?;

        Ok(())
    }

    async fn create_backend(&self, backend: &Backend) -> RepoResult<()> {
        sqlx::query("INSERT INTO backends (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(backend.id)
            .bind(&backend.name)
            .bind(backend.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::from_insert(e, format!("backend '{}'", backend.name)))?;

        Ok(())
    }

    async fn link_backend(&self, backend_id: Uuid, pipeline_id: Uuid) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO backend_pipelines (backend_id, pipeline_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(backend_id)
        .bind(pipeline_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            RepositoryError::from_insert(e, format!("link {} -> {}", backend_id, pipeline_id))
        })?;

        sqlx::query("UPDATE pipelines SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(pipeline_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_service(&self, service: &ProcessingService) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_services (id, name, backend_id, endpoint_url, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(service.id)
        .bind(&service.name)
        .bind(service.backend_id)
        .bind(&service.endpoint_url)
        .bind(service.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, format!("service '{}'", service.name)))?;

        Ok(())
    }

    async fn find_service(&self, id: Uuid) -> RepoResult<Option<ProcessingService>> {
        let row = sqlx::query_as::<_, ServiceRow>(&format!("{} WHERE id = $1", SELECT_SERVICES))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn set_endpoint(&self, id: Uuid, endpoint_url: Option<String>) -> RepoResult<()> {
        // Right-hand column references read the pre-update row
        let result = sqlx::query(
            r#"
            UPDATE processing_services
            SET endpoint_url = $1,
                last_seen = CASE WHEN endpoint_url IS DISTINCT FROM $1 THEN NULL ELSE last_seen END,
                last_seen_live = CASE WHEN endpoint_url IS DISTINCT FROM $1 THEN NULL ELSE last_seen_live END,
                last_seen_latency_us = CASE WHEN endpoint_url IS DISTINCT FROM $1 THEN NULL ELSE last_seen_latency_us END
            WHERE id = $2
            "#,
        )
        .bind(endpoint_url)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
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
        sqlx::query(
            r#"
            UPDATE processing_services
            SET last_seen = $1, last_seen_live = $1, last_seen_latency_us = $2
            WHERE id = $3
            "#,
        )
        .bind(at)
        .bind(latency.as_micros() as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_probe_failure(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()> {
        sqlx::query("UPDATE processing_services SET last_seen = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Row Types
// =============================================================================

const SELECT_SERVICES: &str = r#"
    SELECT id, name, backend_id, endpoint_url, last_seen, last_seen_live,
           last_seen_latency_us, created_at
    FROM processing_services
"#;

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    queue_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            queue_name: row.queue_name,
            backends: BTreeSet::new(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BackendRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<BackendRow> for Backend {
    fn from(row: BackendRow) -> Self {
        Backend {
            id: row.id,
            name: row.name,
            pipelines: BTreeSet::new(),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ServiceRow {
    id: Uuid,
    name: String,
    backend_id: Uuid,
    endpoint_url: Option<String>,
    last_seen: Option<DateTime<Utc>>,
    last_seen_live: Option<DateTime<Utc>>,
    last_seen_latency_us: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<ServiceRow> for ProcessingService {
    fn from(row: ServiceRow) -> Self {
        ProcessingService {
            id: row.id,
            name: row.name,
            backend_id: row.backend_id,
            endpoint_url: row.endpoint_url,
            liveness: Liveness {
                last_seen: row.last_seen,
                last_seen_live: row.last_seen_live,
                last_seen_latency: row
                    .last_seen_latency_us
                    .map(|us| Duration::from_micros(us.max(0) as u64)),
            },
            created_at: row.created_at,
        }
    }
}
