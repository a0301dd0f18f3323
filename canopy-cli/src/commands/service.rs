//! Processing service command handlers
//!
//! Registration, endpoint assignment, on-demand probes and `/info` sync.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use canopy_client::OrchestratorClient;
use canopy_core::domain::backend::ServiceStatus;
use canopy_core::dto::registry::{RegisterService, ServiceSummary};

use crate::config::Config;
use crate::id_resolver::{resolve_backend_id, resolve_service_id};
use crate::types::IdOrPrefix;

/// Processing service subcommands
#[derive(Subcommand)]
pub enum ServiceCommands {
    /// List all processing services with their liveness
    List,
    /// Register a processing service under a backend
    Register {
        /// Service name
        name: String,

        /// Backend ID or unambiguous prefix
        #[arg(short, long)]
        backend: String,

        /// Endpoint base URL
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Assign an endpoint; omit the URL to clear it
    Endpoint {
        /// Service ID or unambiguous prefix
        id: String,

        /// Endpoint base URL
        url: Option<String>,
    },
    /// Probe a service now
    Probe {
        /// Service ID or unambiguous prefix
        id: String,
    },
    /// Import the pipelines a service advertises
    Sync {
        /// Service ID or unambiguous prefix
        id: String,
    },
}

/// Handle processing service commands
pub async fn handle_service_command(command: ServiceCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ServiceCommands::List => list_services(&client).await,
        ServiceCommands::Register {
            name,
            backend,
            endpoint,
        } => {
            let backend_id = resolve_backend_id(&client, &IdOrPrefix::parse(&backend)).await?;
            let service = client
                .register_service(RegisterService {
                    name,
                    backend_id,
                    endpoint_url: endpoint,
                })
                .await?;

            println!("{}", "✓ Service registered successfully!".green().bold());
            print_service_summary(&service);
            Ok(())
        }
        ServiceCommands::Endpoint { id, url } => {
            let service_id = resolve_service_id(&client, &IdOrPrefix::parse(&id)).await?;
            let service = client.set_endpoint(service_id, url).await?;

            println!("{}", "✓ Endpoint updated".green().bold());
            print_service_summary(&service);
            Ok(())
        }
        ServiceCommands::Probe { id } => probe_service(&client, &id).await,
        ServiceCommands::Sync { id } => sync_service(&client, &id).await,
    }
}

async fn list_services(client: &OrchestratorClient) -> Result<()> {
    let services = client.list_services().await?;

    if services.is_empty() {
        println!("{}", "No processing services registered.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} processing service(s):", services.len()).bold()
        );
        println!();
        for service in services {
            print_service_summary(&service);
        }
    }

    Ok(())
}

async fn probe_service(client: &OrchestratorClient, id: &str) -> Result<()> {
    let service_id = resolve_service_id(client, &IdOrPrefix::parse(id)).await?;
    let probe = client.probe_service(service_id).await?;

    if probe.reachable {
        println!(
            "{} live ({} ms)",
            "✓".green(),
            probe.latency.as_millis()
        );
    } else {
        println!(
            "{} unreachable after {} ms: {}",
            "✗".red(),
            probe.latency.as_millis(),
            probe.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

async fn sync_service(client: &OrchestratorClient, id: &str) -> Result<()> {
    let service_id = resolve_service_id(client, &IdOrPrefix::parse(id)).await?;
    let report = client.sync_service(service_id).await?;

    println!("{}", "✓ Service synced".green().bold());
    for name in &report.created {
        println!("  {} {} (created)", "+".green(), name);
    }
    for name in &report.linked {
        println!("  {} {} (linked)", "~".cyan(), name);
    }
    for name in &report.unchanged {
        println!("  {} {}", "=".dimmed(), name.dimmed());
    }

    Ok(())
}

fn print_service_summary(service: &ServiceSummary) {
    println!("  {} {}", "▸".cyan(), service.name.bold());
    println!("    ID:        {}", service.id.to_string().dimmed());
    println!("    Backend:   {}", service.backend_id.to_string().dimmed());
    println!(
        "    Endpoint:  {}",
        service.endpoint_url.as_deref().unwrap_or("-")
    );
    println!("    Status:    {}", colorize_status(service.status));
    if let Some(latency) = service.last_seen_latency {
        println!("    Latency:   {} ms", latency.as_millis());
    }
    if let Some(seen) = service.last_seen {
        println!(
            "    Last seen: {}",
            seen.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    println!();
}

/// Colorize service status for display
fn colorize_status(status: ServiceStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        ServiceStatus::Online => status_str.green(),
        ServiceStatus::Offline => status_str.red(),
        ServiceStatus::Unknown => status_str.yellow(),
        ServiceStatus::Unassigned => status_str.dimmed(),
    }
}
