//! Pipeline command handlers
//!
//! Handles pipeline registry commands: listing, creation and queue lookup.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use canopy_client::OrchestratorClient;
use canopy_core::domain::pipeline::{Pipeline, queue_name_for, validate_pipeline_name};
use canopy_core::dto::registry::CreatePipeline;

use crate::config::Config;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// List all pipelines
    List,
    /// Register a new pipeline
    Create {
        /// Pipeline name (lowercase slug)
        name: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Print the queue name workers of a pipeline consume
    Queue {
        /// Pipeline name
        name: String,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    match command {
        PipelineCommands::List => list_pipelines(&config.client()).await,
        PipelineCommands::Create { name, description } => {
            create_pipeline(&config.client(), name, description).await
        }
        PipelineCommands::Queue { name } => {
            validate_pipeline_name(&name).context("Invalid pipeline name")?;
            println!("{}", queue_name_for(&name));
            Ok(())
        }
    }
}

/// Register a new pipeline
async fn create_pipeline(
    client: &OrchestratorClient,
    name: String,
    description: Option<String>,
) -> Result<()> {
    let pipeline = client
        .create_pipeline(CreatePipeline { name, description })
        .await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:    {}", pipeline.id.to_string().cyan());
    println!("  Name:  {}", pipeline.name.bold());
    println!("  Queue: {}", pipeline.queue_name.dimmed());

    Ok(())
}

/// List all pipelines
async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

/// Print a pipeline summary
fn print_pipeline_summary(pipeline: &Pipeline) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    ID:       {}", pipeline.id.to_string().dimmed());
    println!("    Queue:    {}", pipeline.queue_name.dimmed());
    println!("    Backends: {}", pipeline.backends.len());
    println!(
        "    Created:  {}",
        pipeline
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(desc) = &pipeline.description {
        println!("    Description: {}", desc.dimmed());
    }
    println!();
}
