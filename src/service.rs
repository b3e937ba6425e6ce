//! Order operations behind the HTTP API
//!
//! [`OrderService`] wires the store, fetcher, archive builder, guard, token
//! service and job queue together from a [`Config`].

use crate::archive::ArchiveBuilder;
use crate::callback::CallbackClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::fulfillment::Fulfiller;
use crate::guard::ConcurrencyGuard;
use crate::order::{CANONICAL_NAME, OrderStore, parse_chunk_index};
use crate::queue::JobQueue;
use crate::token::TokenService;
use crate::types::{DownloadLink, DownloadLinks, FulfillmentJob, OrderId, TaskId, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;

/// A chunk resolved from a download token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDownload {
    /// File on disk
    pub path: PathBuf,
    /// Name offered to the client (`order_<order_number>[_<n>].zip`)
    pub download_name: String,
    /// Size in bytes
    pub size: u64,
}

/// Facade over the order lifecycle
#[derive(Clone)]
pub struct OrderService {
    config: Arc<Config>,
    store: OrderStore,
    guard: ConcurrencyGuard,
    tokens: Arc<TokenService>,
    queue: JobQueue,
}

impl OrderService {
    /// Build every component from `config`
    ///
    /// Creates the data directory and the token key file if they are missing.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = OrderStore::new(&config.data_dir);
        let guard = ConcurrencyGuard::new(store.clone(), &config.lock);
        let tokens = TokenService::from_key_file(&config.key_file(), store.clone())?;
        let fulfiller = Fulfiller::new(
            store.clone(),
            Fetcher::new(&config.network)?,
            ArchiveBuilder::new(&config.archive),
            guard.clone(),
            CallbackClient::new(&config.callback, config.network.retry.clone()),
        );
        let queue = JobQueue::new(fulfiller, &config.workers);

        Ok(Self {
            config: Arc::new(config),
            store,
            guard,
            tokens: Arc::new(tokens),
            queue,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create the order directory and queue its first fulfillment run
    ///
    /// Fails with `OrderError::AlreadyExists` if the order was created before.
    pub async fn create_order(&self, job: FulfillmentJob) -> Result<TaskId> {
        let order = job.order_id()?;
        self.store.create(&order).await?;
        Ok(self.queue.submit(job).await)
    }

    /// Queue another fulfillment run for an existing order
    ///
    /// Files land in the same cache, so the rebuilt archive covers every run.
    pub async fn fulfill(&self, job: FulfillmentJob) -> Result<TaskId> {
        let order = job.order_id()?;
        self.store.require(&order).await?;
        Ok(self.queue.submit(job).await)
    }

    /// Status of a queued job
    pub async fn task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.queue.status(id).await
    }

    /// Remove an order and everything it produced
    ///
    /// Waits for any rebuild in progress to finish first.
    pub async fn delete_order(&self, order: &OrderId) -> Result<()> {
        self.store.require(order).await?;
        let lock = self.guard.acquire(order).await?;
        match self.store.delete(order).await {
            Ok(()) => {
                lock.release_deleted();
                Ok(())
            }
            Err(e) => {
                drop(lock);
                Err(e)
            }
        }
    }

    /// Revoke existing links and mint one fresh link per published chunk
    pub async fn request_links(&self, order: &OrderId) -> Result<DownloadLinks> {
        self.store.require(order).await?;
        let lock = self.guard.acquire(order).await?;
        let minted = self.mint_links(order).await;
        let links = lock.release_with(minted)?;
        tracing::info!(order = %order, links = links.urls.len(), "Issued download links");
        Ok(links)
    }

    async fn mint_links(&self, order: &OrderId) -> Result<DownloadLinks> {
        self.tokens.invalidate(order).await?;

        let base = self.config.api.public_url.trim_end_matches('/');
        let mut urls = Vec::new();
        for path in self.store.list_chunks(order).await? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let size = tokio::fs::metadata(&path).await?.len();
            let token = self.tokens.mint(order, file_name).await?;
            urls.push(DownloadLink {
                url: format!("{base}/api/download/{token}"),
                size,
            });
        }

        Ok(DownloadLinks { urls })
    }

    /// Resolve a download token to the chunk it grants
    pub async fn open_download(&self, token: &str) -> Result<ResolvedDownload> {
        let target = self.tokens.validate(token).await?;
        let path = self.store.data_dir().join(target.relative_path());

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(Error::NotFound(target.file_name.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(target.file_name.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ResolvedDownload {
            download_name: download_name(&target.order.order_number, &target.file_name),
            path,
            size: metadata.len(),
        })
    }

    /// Stop accepting new work
    pub fn shutdown(&self) {
        self.queue.close();
    }
}

/// Client-facing file name for a chunk
fn download_name(order_number: &str, file_name: &str) -> String {
    if file_name == CANONICAL_NAME {
        format!("order_{order_number}.zip")
    } else if let Some(index) = parse_chunk_index(file_name) {
        format!("order_{order_number}_{index}.zip")
    } else {
        format!("order_{order_number}_{file_name}")
    }
}
