//! # Tubes Server
//!
//! Realtime channel router exposing a WebSocket endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tubes
//!
//! # Run with an explicit config file
//! TUBES_CONFIG=/path/to/tubes.toml tubes
//!
//! # Run with environment overrides
//! TUBES_PORT=8080 TUBES_HOST=0.0.0.0 TUBES_CHANNELS__CHAT_PREFIX=rooms tubes
//! ```

mod chat;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubes=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::var("TUBES_CONFIG") {
        Ok(path) => config::Config::from_file(path)?,
        Err(_) => config::Config::load()?,
    };

    tracing::info!("Starting Tubes server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
