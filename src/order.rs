//! On-disk layout and lifecycle of orders
//!
//! Every order owns `<data_dir>/<tenant_id>/<order_number>/`:
//!
//! ```text
//! cache/            downloaded payload files
//! cache_oversize/   files larger than the chunk limit (persistent)
//! logs/             one JSON report per fulfillment run
//! split/            scratch space, recreated on every rebuild
//! lock              durable lock marker
//! .seed             token seed material
//! output.zip        single-archive result, or
//! output1.zip ..    numbered chunks
//! ```

use crate::error::{Error, OrderError, Result};
use crate::types::{FulfillmentReport, OrderId};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Name of the canonical single-archive output
pub const CANONICAL_NAME: &str = "output.zip";

/// Paths inside one order directory
#[derive(Clone, Debug)]
pub struct OrderLayout {
    root: PathBuf,
}

impl OrderLayout {
    /// Layout rooted at an existing (or to-be-created) order directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The order directory itself
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Downloaded payload files
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Files individually larger than the chunk limit
    pub fn oversize_dir(&self) -> PathBuf {
        self.root.join("cache_oversize")
    }

    /// Run reports
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Scratch directory for rebuilds
    pub fn split_dir(&self) -> PathBuf {
        self.root.join("split")
    }

    /// Durable lock marker
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Token seed material
    pub fn seed_file(&self) -> PathBuf {
        self.root.join(".seed")
    }

    /// `output.zip`
    pub fn canonical_output(&self) -> PathBuf {
        self.root.join(CANONICAL_NAME)
    }

    /// `output<index>.zip`
    pub fn chunk_output(&self, index: usize) -> PathBuf {
        self.root.join(chunk_name(index))
    }

    /// Published outputs currently on disk: `output.zip` (if any) followed by
    /// the numbered chunks in index order
    pub fn published_outputs(&self) -> Result<Vec<PathBuf>> {
        let mut numbered = Vec::new();
        let mut canonical = None;

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == CANONICAL_NAME {
                canonical = Some(entry.path());
            } else if let Some(index) = parse_chunk_index(name) {
                numbered.push((index, entry.path()));
            }
        }

        numbered.sort_by_key(|(index, _)| *index);
        Ok(canonical
            .into_iter()
            .chain(numbered.into_iter().map(|(_, path)| path))
            .collect())
    }
}

/// File name of chunk `index`
pub fn chunk_name(index: usize) -> String {
    format!("output{index}.zip")
}

/// Extract `N` from `output<N>.zip`
pub fn parse_chunk_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("output")?.strip_suffix(".zip")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|index| *index > 0)
}

/// Order directories under the data directory
#[derive(Clone, Debug)]
pub struct OrderStore {
    data_dir: PathBuf,
}

impl OrderStore {
    /// Store rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Layout of an order (the directory may not exist)
    pub fn layout(&self, order: &OrderId) -> OrderLayout {
        OrderLayout::new(self.data_dir.join(order.relative_dir()))
    }

    /// Whether the order directory exists
    pub async fn exists(&self, order: &OrderId) -> bool {
        tokio::fs::metadata(self.layout(order).root())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Layout of an existing order, or `OrderError::NotFound`
    pub async fn require(&self, order: &OrderId) -> Result<OrderLayout> {
        if self.exists(order).await {
            Ok(self.layout(order))
        } else {
            Err(not_found(order))
        }
    }

    /// Create the order directory with its `cache/` and `logs/` subdirectories
    ///
    /// Fails with `OrderError::AlreadyExists` if the order directory exists.
    pub async fn create(&self, order: &OrderId) -> Result<OrderLayout> {
        let layout = self.layout(order);

        if let Some(tenant_dir) = layout.root().parent() {
            tokio::fs::create_dir_all(tenant_dir).await?;
        }

        match tokio::fs::create_dir(layout.root()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(OrderError::AlreadyExists {
                    tenant_id: order.tenant_id.clone(),
                    order_number: order.order_number.clone(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        tokio::fs::create_dir_all(layout.cache_dir()).await?;
        tokio::fs::create_dir_all(layout.logs_dir()).await?;

        tracing::info!(
            tenant_id = %order.tenant_id,
            order_number = %order.order_number,
            "Created order directory"
        );
        Ok(layout)
    }

    /// Remove the entire order subtree
    pub async fn delete(&self, order: &OrderId) -> Result<()> {
        let layout = self.require(order).await?;
        tokio::fs::remove_dir_all(layout.root()).await?;

        tracing::info!(
            tenant_id = %order.tenant_id,
            order_number = %order.order_number,
            "Deleted order directory"
        );
        Ok(())
    }

    /// Published chunk files of an existing order
    pub async fn list_chunks(&self, order: &OrderId) -> Result<Vec<PathBuf>> {
        let layout = self.require(order).await?;
        tokio::task::spawn_blocking(move || layout.published_outputs())
            .await
            .map_err(|e| Error::Other(format!("chunk listing task panicked: {e}")))?
    }

    /// Persist a run report as `logs/<timestamp>_<request_id>.json`
    pub async fn write_log(&self, order: &OrderId, report: &FulfillmentReport) -> Result<PathBuf> {
        let layout = self.require(order).await?;
        let logs_dir = layout.logs_dir();
        tokio::fs::create_dir_all(&logs_dir).await?;

        let file_name = format!(
            "{}_{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
            sanitize_log_component(&report.request_id)
        );
        let path = logs_dir.join(file_name);
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, json).await?;

        tracing::debug!(path = %path.display(), "Wrote run report");
        Ok(path)
    }
}

/// `OrderError::NotFound` for `order`
pub fn not_found(order: &OrderId) -> Error {
    OrderError::NotFound {
        tenant_id: order.tenant_id.clone(),
        order_number: order.order_number.clone(),
    }
    .into()
}

fn sanitize_log_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}
