use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod isolation;
pub mod repository;
pub mod service;
pub mod state;

use config::{OrchestratorConfig, StoreKind};
use repository::MemoryStore;
use state::{AppState, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Canopy Orchestrator...");

    let config = OrchestratorConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store = match config.store {
        StoreKind::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(&config.database_url)
                .await
                .context("Failed to create database pool")?;

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Store::postgres(pool)
        }
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            Store::memory(Arc::new(MemoryStore::new()))
        }
    };

    let state = AppState::new(store, &config);

    // Background loops
    tokio::spawn(state.monitor.clone().run(config.probe_interval));
    tokio::spawn(state.watchdog.clone().run(config.watchdog_interval));

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
