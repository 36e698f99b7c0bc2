//! uptime-keeper - website uptime and keep-alive monitor.
//!
//! Checks HTTP endpoints on fixed interval tiers, keeps sleeping free-tier
//! deployments awake, and serves the results over a small JSON API.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use probe::HttpChecker;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptime_keeper=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting uptime-keeper on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let checker = Arc::new(HttpChecker::new(&cfg.user_agent)?);

    // Create and start scheduler
    let scheduler = Arc::new(Scheduler::new(store.clone(), checker, cfg.monitor.clone()));
    scheduler.start().await;

    // Serve until a shutdown signal arrives
    let server = Server::new(cfg, store, scheduler.clone());
    let result = server.start(shutdown_signal()).await;

    scheduler.stop().await;
    tracing::info!("Shutdown complete");

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
