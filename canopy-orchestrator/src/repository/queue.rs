//! Queue Repository
//!
//! Postgres-backed work queues. A unit row is visible once `visible_at` has
//! passed; leasing pushes `visible_at` forward by the lease duration, so an
//! unacknowledged unit reappears on its own when the lease runs out.

use std::time::Duration;

use async_trait::async_trait;
use canopy_core::domain::unit::{SourceImage, WorkUnit};
use canopy_core::dto::queue::Lease;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{RepoResult, RepositoryError, WorkQueue, deadline};

pub struct PgWorkQueue {
    pool: PgPool,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn enqueue(&self, queue_name: &str, unit: &WorkUnit) -> RepoResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO work_units (id, queue_name, job_id, pipeline, images,
                                    attempt_count, enqueued_at, visible_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(unit.id)
        .bind(queue_name)
        .bind(unit.job_id)
        .bind(&unit.pipeline)
        .bind(Json(&unit.images))
        .bind(unit.attempt_count as i32)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, format!("unit {}", unit.id)))?;

        Ok(())
    }

    async fn lease(
        &self,
        queue_name: &str,
        worker_id: &str,
        lease_for: Duration,
    ) -> RepoResult<Option<Lease>> {
        let now = Utc::now();
        let expires_at = deadline(now, lease_for);
        let lease_id = Uuid::new_v4();

        let row = sqlx::query_as::<_, UnitRow>(
            r#"
            UPDATE work_units
            SET lease_id = $1, leased_by = $2, visible_at = $3
            WHERE id = (
                SELECT id FROM work_units
                WHERE queue_name = $4 AND visible_at <= $5
                ORDER BY visible_at ASC, enqueued_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, job_id, pipeline, images, attempt_count
            "#,
        )
        .bind(lease_id)
        .bind(worker_id)
        .bind(expires_at)
        .bind(queue_name)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Lease {
            lease_id,
            queue_name: queue_name.to_string(),
            unit: row.into(),
            expires_at,
        }))
    }

    async fn ack(&self, lease_id: Uuid) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM work_units WHERE lease_id = $1")
            .bind(lease_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("lease {}", lease_id)));
        }
        Ok(())
    }

    async fn nack(&self, lease_id: Uuid, delay: Duration) -> RepoResult<()> {
        let visible_at = deadline(Utc::now(), delay);

        let result = sqlx::query(
            r#"
            UPDATE work_units
            SET attempt_count = attempt_count + 1, visible_at = $1,
                lease_id = NULL, leased_by = NULL
            WHERE lease_id = $2
            "#,
        )
        .bind(visible_at)
        .bind(lease_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("lease {}", lease_id)));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    id: Uuid,
    job_id: Uuid,
    pipeline: String,
    images: Json<Vec<SourceImage>>,
    attempt_count: i32,
}

impl From<UnitRow> for WorkUnit {
    fn from(row: UnitRow) -> Self {
        WorkUnit {
            id: row.id,
            job_id: row.job_id,
            pipeline: row.pipeline,
            images: row.images.0,
            attempt_count: row.attempt_count.max(0) as u32,
        }
    }
}
