//! Job Repository
//!
//! Postgres storage for jobs, the per-job outcome ledger and the detections
//! reconciled from unit results.

use std::collections::HashMap;

use async_trait::async_trait;
use canopy_core::domain::job::{ErrorDetail, Job, JobStatus, Progress, TargetScope};
use canopy_core::dto::job::JobFilter;
use canopy_core::dto::processing::{BoundingBox, Classification, Detection};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{JobRepository, RepoResult, RepositoryError, UnitCommit};

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_JOBS: &str = r#"
    SELECT id, pipeline, target, status, total, completed, failed, created_at,
           queued_at, started_at, finished_at, last_activity_at, error_detail
    FROM jobs
"#;

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &Job) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, pipeline, target, status, total, completed, failed,
                              created_at, queued_at, started_at, finished_at,
                              last_activity_at, error_detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(job.id)
        .bind(&job.pipeline)
        .bind(Json(&job.target))
        .bind(job.status.as_str())
        .bind(job.progress.total as i32)
        .bind(job.progress.completed as i32)
        .bind(job.progress.failed as i32)
        .bind(job.created_at)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.last_activity_at)
        .bind(job.error_detail.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, format!("job {}", job.id)))?;

        Ok(())
    }

    async fn update(&self, job: &Job) -> RepoResult<()> {
        let result = update_job(job).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn find(&self, id: Uuid) -> RepoResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{} WHERE id = $1", SELECT_JOBS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> RepoResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"{}
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR pipeline = $2)
            ORDER BY created_at DESC
            "#,
            SELECT_JOBS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.pipeline)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_stalled(&self, cutoff: DateTime<Utc>) -> RepoResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE status = ANY($1) AND last_activity_at < $2 ORDER BY last_activity_at ASC",
            SELECT_JOBS
        ))
        .bind(
            [JobStatus::Created, JobStatus::Queued, JobStatus::Started]
                .map(|status| status.as_str())
                .to_vec(),
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn is_unit_recorded(&self, job_id: Uuid, unit_id: Uuid) -> RepoResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM job_unit_outcomes WHERE job_id = $1 AND unit_id = $2)",
        )
        .bind(job_id)
        .bind(unit_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn commit_unit(&self, job: &Job, unit: UnitCommit<'_>) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO job_unit_outcomes (job_id, unit_id, succeeded, attempts, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (job_id, unit_id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(unit.unit_id)
        .bind(unit.succeeded)
        .bind(unit.attempts as i32)
        .bind(job.last_activity_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Err(RepositoryError::Conflict(format!(
                "outcome of unit {} for job {}",
                unit.unit_id, job.id
            )));
        }

        for detection in unit.results.map(|r| r.detections.as_slice()).unwrap_or_default() {
            let detection_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO detections (id, job_id, unit_id, source_image_id,
                                        x1, y1, x2, y2, algorithm, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(detection_id)
            .bind(job.id)
            .bind(unit.unit_id)
            .bind(detection.source_image_id)
            .bind(detection.bbox.x1)
            .bind(detection.bbox.y1)
            .bind(detection.bbox.x2)
            .bind(detection.bbox.y2)
            .bind(&detection.algorithm)
            .bind(detection.timestamp)
            .execute(&mut *tx)
            .await?;

            for (position, classification) in detection.classifications.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO classifications (id, detection_id, position, classification,
                                                 labels, scores, algorithm, terminal, timestamp)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(detection_id)
                .bind(position as i32)
                .bind(&classification.classification)
                .bind(&classification.labels)
                .bind(&classification.scores)
                .bind(&classification.algorithm)
                .bind(classification.terminal)
                .bind(classification.timestamp)
                .execute(&mut *tx)
                .await?;
            }
        }

        update_job(job).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn detections(&self, job_id: Uuid) -> RepoResult<Vec<Detection>> {
        let rows = sqlx::query_as::<_, DetectionRow>(
            r#"
            SELECT id, source_image_id, x1, y1, x2, y2, algorithm, timestamp
            FROM detections
            WHERE job_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let classification_rows = sqlx::query_as::<_, ClassificationRow>(
            r#"
            SELECT detection_id, classification, labels, scores, algorithm, terminal, timestamp
            FROM classifications
            WHERE detection_id = ANY($1)
            ORDER BY detection_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_detection: HashMap<Uuid, Vec<Classification>> = HashMap::new();
        for row in classification_rows {
            by_detection
                .entry(row.detection_id)
                .or_default()
                .push(row.into());
        }

        Ok(rows
            .into_iter()
            .map(|row| Detection {
                classifications: by_detection.remove(&row.id).unwrap_or_default(),
                source_image_id: row.source_image_id,
                bbox: BoundingBox {
                    x1: row.x1,
                    y1: row.y1,
                    x2: row.x2,
                    y2: row.y2,
                },
                algorithm: row.algorithm,
                timestamp: row.timestamp,
            })
            .collect())
    }
}

fn update_job(job: &Job) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, total = $2, completed = $3, failed = $4, queued_at = $5,
            started_at = $6, finished_at = $7, last_activity_at = $8, error_detail = $9
        WHERE id = $10
        "#,
    )
    .bind(job.status.as_str())
    .bind(job.progress.total as i32)
    .bind(job.progress.completed as i32)
    .bind(job.progress.failed as i32)
    .bind(job.queued_at)
    .bind(job.started_at)
    .bind(job.finished_at)
    .bind(job.last_activity_at)
    .bind(job.error_detail.as_ref().map(Json))
    .bind(job.id)
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    pipeline: String,
    target: Json<TargetScope>,
    status: String,
    total: i32,
    completed: i32,
    failed: i32,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
    error_detail: Option<Json<ErrorDetail>>,
}

impl TryFrom<JobRow> for Job {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(RepositoryError::Corrupt)?;

        Ok(Job {
            id: row.id,
            pipeline: row.pipeline,
            target: row.target.0,
            status,
            progress: Progress {
                total: row.total.max(0) as u32,
                completed: row.completed.max(0) as u32,
                failed: row.failed.max(0) as u32,
            },
            created_at: row.created_at,
            queued_at: row.queued_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            last_activity_at: row.last_activity_at,
            error_detail: row.error_detail.map(|d| d.0),
        })
    }
}

#[derive(sqlx::FromRow)]
struct DetectionRow {
    id: Uuid,
    source_image_id: Uuid,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    algorithm: String,
    timestamp: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ClassificationRow {
    detection_id: Uuid,
    classification: String,
    labels: Vec<String>,
    scores: Vec<f64>,
    algorithm: String,
    terminal: bool,
    timestamp: DateTime<Utc>,
}

impl From<ClassificationRow> for Classification {
    fn from(row: ClassificationRow) -> Self {
        Classification {
            classification: row.classification,
            labels: row.labels,
            scores: row.scores,
            algorithm: row.algorithm,
            terminal: row.terminal,
            timestamp: row.timestamp,
        }
    }
}
