//! Backend command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use canopy_client::OrchestratorClient;
use canopy_core::domain::backend::Backend;
use canopy_core::dto::registry::CreateBackend;

use crate::config::Config;
use crate::id_resolver::resolve_backend_id;
use crate::types::IdOrPrefix;

/// Backend subcommands
#[derive(Subcommand)]
pub enum BackendCommands {
    /// List all backends
    List,
    /// Create a backend
    Create {
        /// Backend name
        name: String,
    },
    /// Declare that a backend serves a pipeline
    Link {
        /// Backend ID or unambiguous prefix
        backend: String,

        /// Pipeline name
        pipeline: String,
    },
}

/// Handle backend commands
pub async fn handle_backend_command(command: BackendCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        BackendCommands::List => list_backends(&client).await,
        BackendCommands::Create { name } => {
            let backend = client.create_backend(CreateBackend { name }).await?;

            println!("{}", "✓ Backend created successfully!".green().bold());
            println!("  ID:   {}", backend.id.to_string().cyan());
            println!("  Name: {}", backend.name.bold());
            Ok(())
        }
        BackendCommands::Link { backend, pipeline } => {
            link_backend(&client, &backend, &pipeline).await
        }
    }
}

async fn list_backends(client: &OrchestratorClient) -> Result<()> {
    let backends = client.list_backends().await?;

    if backends.is_empty() {
        println!("{}", "No backends found.".yellow());
    } else {
        println!("{}", format!("Found {} backend(s):", backends.len()).bold());
        println!();
        for backend in backends {
            print_backend_summary(&backend);
        }
    }

    Ok(())
}

async fn link_backend(client: &OrchestratorClient, backend: &str, pipeline: &str) -> Result<()> {
    let backend_id = resolve_backend_id(client, &IdOrPrefix::parse(backend)).await?;
    let pipeline = client.get_pipeline_by_name(pipeline).await?;

    let backend = client.link_backend(backend_id, pipeline.id).await?;

    println!(
        "{}",
        format!("✓ Backend {} now serves {}", backend.name, pipeline.name)
            .green()
            .bold()
    );

    Ok(())
}

fn print_backend_summary(backend: &Backend) {
    println!("  {} {}", "▸".cyan(), backend.name.bold());
    println!("    ID:        {}", backend.id.to_string().dimmed());
    println!("    Pipelines: {}", backend.pipelines.len());
    println!(
        "    Created:   {}",
        backend
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}
