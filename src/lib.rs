//! # order-dl
//!
//! Order fulfillment backend: downloads the files of a customer order,
//! packs everything the order has accumulated into size-capped zip archives
//! and hands out revocable, encrypted download links for them.
//!
//! ## Pipeline
//!
//! 1. `POST /api/order` creates `<data_dir>/<tenant>/<order>/` and queues a
//!    [`FulfillmentJob`](types::FulfillmentJob).
//! 2. A worker downloads every item into the order's `cache/` over HTTP(S) or
//!    FTP, recording per-item failures with their error numbers.
//! 3. Under the per-order lock the whole cache is rebuilt into `output.zip`
//!    or `output1.zip … outputN.zip`, none larger than `max_zip_size`.
//! 4. The run report is written to `logs/` and POSTed to the callback URL.
//! 5. `GET /api/download/<tenant>/<order>` revokes earlier links and mints one
//!    token per chunk; `GET /api/download/<token>` streams it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use order_dl::{Config, OrderService, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     config.validate()?;
//!
//!     let service = OrderService::new(config)?;
//!     run_with_shutdown(service).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Zip archive building and splitting
pub mod archive;
/// Completion callbacks
pub mod callback;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// HTTP(S) and FTP downloads
pub mod fetcher;
/// Fulfillment runs
pub mod fulfillment;
/// Per-order locking
pub mod guard;
/// Order directory layout and lifecycle
pub mod order;
/// Background job queue
pub mod queue;
/// Retry logic with backoff
pub mod retry;
/// Order service facade
pub mod service;
/// Download-link tokens
pub mod token;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{
    ApiError, ArchiveError, Error, ErrorDetail, FetchError, OrderError, Result, ToHttpStatus,
    TokenError,
};
pub use service::OrderService;
pub use types::{
    DownloadLink, DownloadLinks, DownloadSpec, FetchFailure, FulfillmentJob, FulfillmentReport,
    OrderId, TaskId, TaskStatus,
};

/// Serve the API until a termination signal arrives, then stop the job queue.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Jobs that are already running finish; queued ones are marked failed.
pub async fn run_with_shutdown(service: OrderService) -> Result<()> {
    let served = api::start_api_server(service.clone(), wait_for_signal()).await;
    service.shutdown();
    served
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
