//! One fulfillment run: download, rebuild, report

use crate::archive::ArchiveBuilder;
use crate::callback::CallbackClient;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::guard::ConcurrencyGuard;
use crate::order::OrderStore;
use crate::types::{ArchiveSet, FulfillmentJob, FulfillmentReport};

/// Executes fulfillment jobs against an order store
///
/// The download phase runs unlocked, so concurrent runs for the same order
/// may interleave their downloads; only the archive rebuild is serialized.
/// Each rebuild starts from the whole cache, so the last one to finish
/// publishes every file downloaded so far.
#[derive(Clone)]
pub struct Fulfiller {
    store: OrderStore,
    fetcher: Fetcher,
    builder: ArchiveBuilder,
    guard: ConcurrencyGuard,
    callback: CallbackClient,
}

impl Fulfiller {
    /// Assemble a fulfiller from its collaborators
    pub fn new(
        store: OrderStore,
        fetcher: Fetcher,
        builder: ArchiveBuilder,
        guard: ConcurrencyGuard,
        callback: CallbackClient,
    ) -> Self {
        Self {
            store,
            fetcher,
            builder,
            guard,
            callback,
        }
    }

    /// Run `job` to completion
    ///
    /// Per-item download failures are collected into the returned report. A
    /// missing order directory, an archive failure or a lock failure aborts
    /// the run with an error instead.
    pub async fn run(&self, job: FulfillmentJob) -> Result<FulfillmentReport> {
        let order = job.order_id()?;
        let layout = self.store.require(&order).await?;
        let cache_dir = layout.cache_dir();
        tokio::fs::create_dir_all(&cache_dir).await?;
        tokio::fs::create_dir_all(layout.logs_dir()).await?;

        tracing::info!(
            request_id = %job.request_id,
            tenant_id = %order.tenant_id,
            order_number = %order.order_number,
            downloads = job.downloads.len(),
            "Starting fulfillment run"
        );

        let errors = self.fetcher.fetch_all(&job.downloads, &cache_dir).await;

        if job.downloads.is_empty() {
            tracing::info!(request_id = %job.request_id, "Nothing requested, skipping archive rebuild");
        } else {
            let lock = self.guard.acquire(&order).await?;
            let builder = self.builder.clone();
            let root = layout.root().to_path_buf();
            let built = tokio::task::spawn_blocking(move || builder.build(&root, &cache_dir))
                .await
                .map_err(|e| Error::Other(format!("archive task panicked: {e}")))
                .and_then(|built| built);

            let set: ArchiveSet = lock.release_with(built)?;
            tracing::info!(
                request_id = %job.request_id,
                canonical = set.canonical.is_some(),
                chunks = set.chunks.len(),
                "Archive rebuilt"
            );
        }

        let report = FulfillmentReport {
            request_id: job.request_id.clone(),
            order_number: job.order_number.clone(),
            errors,
        };

        self.store.write_log(&order, &report).await?;

        if job.debug {
            tracing::debug!(request_id = %job.request_id, "Debug run, callback suppressed");
        } else if self.callback.is_enabled() {
            self.callback.send(&report).await;
        }

        tracing::info!(
            request_id = %job.request_id,
            failures = report.errors.len(),
            "Fulfillment run finished"
        );
        Ok(report)
    }
}
