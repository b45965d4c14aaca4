//! lmbd - Main Entry Point

use anyhow::Result;
use clap::Parser;
use lmbd::{config::Config, create_app, AppState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lmbd=debug,build_context=debug")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::parse();
    info!("Starting lmbd build service");

    let state = AppState::from_config(&config);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("lmbd listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
