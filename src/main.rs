mod api;
mod bootstrap;
mod clock;
mod config;
mod error;
mod exchange;
mod ledger;
mod notify;
mod report;
mod server;
mod settlement;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Used when `RUST_LOG` is unset. Targets are prefixed with the binary name.
const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug,server=debug";

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("🚀 Starting settlement report service");

    // Load configuration
    dotenv::dotenv().ok();
    let config = config::AppConfig::load()?;

    let shutdown = CancellationToken::new();
    let app = bootstrap::initialize_app(&config, shutdown.clone()).await?;

    // Background report jobs
    let jobs = app.scheduler.start();
    info!("✓ {} report jobs started", jobs.len());

    // Cancel everything on ctrl-c
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Failed to listen for ctrl-c: {}", e);
            }
            info!("🛑 Shutdown requested");
            shutdown.cancel();
        });
    }

    // Run the Server
    let router = server::create_app(app.state);
    if let Err(e) = server::run_server(router, &config.bind_address, shutdown.clone()).await {
        error!("❌ Server error: {}", e);
        shutdown.cancel();
    }

    futures::future::join_all(jobs).await;
    info!("👋 Shutdown complete");

    Ok(())
}
