//! Vakit binary entry point

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vakit::{App, config};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from the `logging` section
/// 3. Initialize App
/// 4. Start background jobs (sync, broom)
/// 5. Wait for Ctrl-C, then stop the job timers
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);
    tracing::info!("Starting Vakit...");
    tracing::info!(
        database = %config.database.path.display(),
        countries = ?config.sync.country_ids,
        months = config.sync.months,
        "Configuration loaded"
    );

    // 3. Initialize metrics
    vakit::metrics::init_metrics();

    // 4. Initialize application state
    let app = App::new(config).await?;

    // 5. Start background jobs
    let mut scheduler = app.start_jobs();
    tracing::info!(jobs = scheduler.len(), "Background jobs started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown();
    tracing::debug!(metrics = %vakit::metrics::gather(), "Final metrics");

    Ok(())
}

/// Install the global subscriber; `RUST_LOG` overrides `logging.level`
fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.directive().into());

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
