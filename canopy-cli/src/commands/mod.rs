//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod backend;
mod image;
mod job;
mod pipeline;
mod service;

pub use backend::BackendCommands;
pub use image::{CollectionCommands, ImageCommands};
pub use job::JobCommands;
pub use pipeline::PipelineCommands;
pub use service::ServiceCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Source image registration
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
    /// Image collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Pipeline registry
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Backend management
    Backend {
        #[command(subcommand)]
        command: BackendCommands,
    },
    /// Processing service management
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Image { command } => image::handle_image_command(command, config).await,
        Commands::Collection { command } => {
            image::handle_collection_command(command, config).await
        }
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Backend { command } => backend::handle_backend_command(command, config).await,
        Commands::Service { command } => service::handle_service_command(command, config).await,
    }
}

