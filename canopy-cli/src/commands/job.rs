//! Job command handlers
//!
//! Handles all job-related CLI commands including submission, listing,
//! viewing details, cancellation and detections.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use canopy_client::OrchestratorClient;
use canopy_core::domain::job::{Job, JobStatus, TargetScope};
use canopy_core::dto::job::{CreateJob, JobFilter};
use canopy_core::dto::processing::Detection;
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a job running a pipeline over images and collections
    Create {
        /// Pipeline name
        pipeline: String,

        /// Source image IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        image: Vec<Uuid>,

        /// Collection IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        collection: Vec<Uuid>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// List jobs
    List {
        /// Only jobs in this status (e.g. QUEUED, PARTIAL_FAILURE)
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Only jobs of this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Cancel a job
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show the detections a job produced
    Detections {
        /// Job ID or unambiguous prefix
        id: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Create {
            pipeline,
            image,
            collection,
        } => create_job(&client, pipeline, image, collection).await,
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::List { status, pipeline } => {
            list_jobs(&client, JobFilter { status, pipeline }).await
        }
        JobCommands::Cancel { id } => cancel_job(&client, &id).await,
        JobCommands::Detections { id, json } => show_detections(&client, &id, json).await,
    }
}

/// Submit a job
async fn create_job(
    client: &OrchestratorClient,
    pipeline: String,
    images: Vec<Uuid>,
    collections: Vec<Uuid>,
) -> Result<()> {
    if images.is_empty() && collections.is_empty() {
        anyhow::bail!("a job needs at least one --image or --collection");
    }

    let job = client
        .create_job(CreateJob {
            pipeline,
            target: TargetScope {
                images,
                collections,
            },
        })
        .await?;

    if job.status == JobStatus::Failure {
        println!("{}", "✗ Job was rejected at dispatch".red().bold());
    } else {
        println!("{}", "✓ Job submitted successfully!".green().bold());
    }
    println!("  Job ID:   {}", job.id.to_string().cyan());
    println!("  Pipeline: {}", job.pipeline);
    println!("  Status:   {}", colorize_status(job.status));
    println!("  Units:    {}", job.progress.total);
    if let Some(detail) = &job.error_detail {
        println!("  Error:    {}", detail.message.red());
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let job = client.get_job(uuid).await?;

    print_job_details(&job);

    Ok(())
}

/// List jobs matching a filter
async fn list_jobs(client: &OrchestratorClient, filter: JobFilter) -> Result<()> {
    let jobs = client.list_jobs(&filter).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

/// Cancel a job
async fn cancel_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let job = client.cancel_job(uuid).await?;

    println!(
        "{}",
        format!("✓ Job {} cancelled", job.id).green().bold()
    );
    println!(
        "  Progress: {}/{} unit(s) finished before cancellation",
        job.progress.finished(),
        job.progress.total
    );

    Ok(())
}

/// Show detections of a job
async fn show_detections(client: &OrchestratorClient, id: &str, json: bool) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let detections = client.job_detections(uuid).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detections)?);
        return Ok(());
    }

    if detections.is_empty() {
        println!("{}", "No detections found for this job.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} detection(s) for job {}:", detections.len(), uuid).bold()
        );
        println!("{}", "─".repeat(80).dimmed());
        for detection in &detections {
            print_detection(detection);
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(())
}

/// Print a job summary
fn print_job_summary(job: &Job) {
    println!("  {} Job {}", "▸".cyan(), job.id.to_string().dimmed());
    println!("    Pipeline: {}", job.pipeline);
    println!("    Status:   {}", colorize_status(job.status));
    println!(
        "    Progress: {}",
        format!(
            "{}/{} done, {} failed",
            job.progress.completed, job.progress.total, job.progress.failed
        )
        .dimmed()
    );
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed job information
fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.id.to_string().cyan());
    println!("  Pipeline:  {}", job.pipeline);
    println!("  Status:    {}", colorize_status(job.status));
    println!("  Created:   {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(queued) = job.queued_at {
        println!("  Queued:    {}", queued.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(started) = job.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(finished) = job.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = finished.signed_duration_since(started);
            println!("  Duration:  {}s", duration.num_seconds());
        }
    }

    println!("\n{}", "Progress:".bold());
    println!("  Total:     {}", job.progress.total);
    println!("  Completed: {}", job.progress.completed.to_string().green());
    println!("  Failed:    {}", job.progress.failed.to_string().red());

    println!("\n{}", "Target:".bold());
    println!("  Images:      {}", job.target.images.len());
    println!("  Collections: {}", job.target.collections.len());

    if let Some(detail) = &job.error_detail {
        println!("\n{}", "Error:".bold());
        println!("  Kind:      {:?}", detail.kind);
        println!("  Message:   {}", detail.message.red());
        if let Some(unenqueued) = detail.unenqueued {
            println!("  Not queued: {}", unenqueued);
        }
        if let Some(failed) = detail.failed_units {
            println!("  Failed units: {}", failed);
        }
    }
}

/// Print one detection with its top classification
fn print_detection(detection: &Detection) {
    let bbox = &detection.bbox;
    let label = detection
        .classifications
        .iter()
        .find(|c| c.terminal)
        .or_else(|| detection.classifications.first())
        .map(|c| c.classification.as_str())
        .unwrap_or("-");

    println!(
        "{} {} [{:.0},{:.0} {:.0},{:.0}] {} {}",
        detection.timestamp.format("%H:%M:%S").to_string().dimmed(),
        detection.source_image_id.to_string().dimmed(),
        bbox.x1,
        bbox.y1,
        bbox.x2,
        bbox.y2,
        label.cyan(),
        detection.algorithm.dimmed()
    );
}

/// Colorize job status for display
fn colorize_status(status: JobStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Created => status_str.dimmed(),
        JobStatus::Queued => status_str.yellow(),
        JobStatus::Started => status_str.cyan(),
        JobStatus::Success => status_str.green(),
        JobStatus::PartialFailure => status_str.magenta(),
        JobStatus::Failure => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}
