//! Bulkmail - Service entry point

use anyhow::{Context, Result};
use bulkmail_api::{create_router, AppState};
use bulkmail_common::config::{Config, LoggingConfig};
use bulkmail_core::LettreTransport;
use bulkmail_storage::{DatabasePool, Repositories};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Bulkmail...");

    // Initialize storage
    let (repos, db_pool) = match config.database.backend.as_str() {
        "postgres" => {
            let db_pool = DatabasePool::new(&config.database).await?;
            info!("Database connection established");

            db_pool.migrate().await?;
            info!("Database migrations completed");

            (Repositories::postgres(db_pool.clone()), Some(db_pool))
        }
        "memory" => {
            warn!("Using in-memory storage; data is lost on restart");
            (Repositories::in_memory(), None)
        }
        other => anyhow::bail!("Unknown database backend: {}", other),
    };

    if config.mail.is_none() {
        info!("No system SMTP account configured; requests must name an account");
    }

    // Initialize send path, dispatcher and runner
    let transport = Arc::new(LettreTransport::new(config.dispatch.smtp_timeout_secs));
    let bind = format!("{}:{}", config.server.bind_address, config.server.port);
    let state = Arc::new(AppState::new(config, repos, transport, db_pool));

    // Resume campaigns interrupted by the last shutdown
    match state.runner.recover().await {
        Ok(0) => {}
        Ok(count) => info!("Recovered {} interrupted campaigns", count),
        Err(e) => error!(error = %e, "Failed to recover campaigns"),
    }

    // Start API server
    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind API server on {}", bind))?;
    info!("Starting API server on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop campaign workers at their next checkpoint and wait for them; their
    // campaigns stay `sending` for the next boot
    state.runner.shutdown().await;

    info!("Bulkmail shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
