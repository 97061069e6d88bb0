//! # Courier Server
//!
//! Realtime presence and message-relay server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (in-memory store)
//! courier
//!
//! # Run with custom config
//! COURIER_DATABASE_URL=postgres://... courier
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod pg_store;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
