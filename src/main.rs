//! order-dl server binary

use order_dl::{Config, OrderService, Result, run_with_shutdown};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("ORDER_DL_CONFIG").ok().map(PathBuf::from);
    match &config_path {
        Some(path) => info!("Loading configuration from {:?}", path),
        None => info!("ORDER_DL_CONFIG not set, using defaults and environment"),
    }

    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    info!(
        data_dir = %config.data_dir.display(),
        max_zip_size = config.archive.max_zip_size,
        workers = config.workers.max_concurrent_jobs,
        api_key = config.api.api_key.is_some(),
        "Configuration loaded"
    );

    let service = OrderService::new(config)?;
    run_with_shutdown(service).await?;

    info!("Shutdown complete");
    Ok(())
}
