use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

const SCHEMA: &[&str] = &[
    // Registry
    r#"
    CREATE TABLE IF NOT EXISTS pipelines (
        id UUID PRIMARY KEY,
        name VARCHAR(200) NOT NULL UNIQUE,
        description TEXT,
        queue_name VARCHAR(255) NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backends (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backend_pipelines (
        backend_id UUID NOT NULL REFERENCES backends(id) ON DELETE CASCADE,
        pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
        PRIMARY KEY (backend_id, pipeline_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processing_services (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        backend_id UUID NOT NULL REFERENCES backends(id) ON DELETE CASCADE,
        endpoint_url TEXT,
        last_seen TIMESTAMPTZ,
        last_seen_live TIMESTAMPTZ,
        last_seen_latency_us BIGINT,
        created_at TIMESTAMPTZ NOT NULL,
        CHECK (last_seen_live IS NULL OR last_seen_live <= last_seen)
    )
    "#,
    // Jobs
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY,
        pipeline VARCHAR(200) NOT NULL,
        target JSONB NOT NULL,
        status VARCHAR(32) NOT NULL,
        total INTEGER NOT NULL DEFAULT 0,
        completed INTEGER NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        queued_at TIMESTAMPTZ,
        started_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ,
        last_activity_at TIMESTAMPTZ NOT NULL,
        error_detail JSONB,
        CHECK (completed + failed <= total)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_unit_outcomes (
        job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        unit_id UUID NOT NULL,
        succeeded BOOLEAN NOT NULL,
        attempts INTEGER NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (job_id, unit_id)
    )
    "#,
    // Queue
    r#"
    CREATE TABLE IF NOT EXISTS work_units (
        id UUID PRIMARY KEY,
        queue_name VARCHAR(255) NOT NULL,
        job_id UUID NOT NULL,
        pipeline VARCHAR(200) NOT NULL,
        images JSONB NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        enqueued_at TIMESTAMPTZ NOT NULL,
        visible_at TIMESTAMPTZ NOT NULL,
        lease_id UUID UNIQUE,
        leased_by VARCHAR(255)
    )
    "#,
    // Images
    r#"
    CREATE TABLE IF NOT EXISTS source_images (
        id UUID PRIMARY KEY,
        url TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collection_images (
        collection_id UUID NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        image_id UUID NOT NULL REFERENCES source_images(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        PRIMARY KEY (collection_id, image_id)
    )
    "#,
    // Results
    r#"
    CREATE TABLE IF NOT EXISTS detections (
        id UUID PRIMARY KEY,
        job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        unit_id UUID NOT NULL,
        source_image_id UUID NOT NULL,
        x1 DOUBLE PRECISION NOT NULL,
        y1 DOUBLE PRECISION NOT NULL,
        x2 DOUBLE PRECISION NOT NULL,
        y2 DOUBLE PRECISION NOT NULL,
        algorithm VARCHAR(255) NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS classifications (
        id UUID PRIMARY KEY,
        detection_id UUID NOT NULL REFERENCES detections(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        classification VARCHAR(255) NOT NULL,
        labels TEXT[] NOT NULL DEFAULT '{}',
        scores DOUBLE PRECISION[] NOT NULL DEFAULT '{}',
        algorithm VARCHAR(255) NOT NULL,
        terminal BOOLEAN NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL
    )
    "#,
    // Indexes
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_activity ON jobs(status, last_activity_at)",
    "CREATE INDEX IF NOT EXISTS idx_work_units_visible ON work_units(queue_name, visible_at)",
    "CREATE INDEX IF NOT EXISTS idx_detections_job_id ON detections(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_classifications_detection ON classifications(detection_id, position)",
];

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
