//! Per-order mutual exclusion for archive rebuilds
//!
//! Two layers protect an order:
//!
//! 1. an in-process async mutex keyed by [`OrderId`], so tasks inside one
//!    process queue up without touching the filesystem;
//! 2. a durable `lock` marker in the order directory, created with
//!    `create_new`, which excludes other processes sharing the data directory
//!    and stays visible if a holder crashes.
//!
//! Waiting never aborts. A marker left by a crashed process blocks the order
//! until an operator removes it, unless `lock.stale_after` is configured.

use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::order::{OrderStore, not_found};
use crate::types::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::OwnedMutexGuard;

type LockTable = Arc<Mutex<HashMap<OrderId, Arc<tokio::sync::Mutex<()>>>>>;

/// Contents of the on-disk marker
#[derive(Debug, Serialize, Deserialize)]
struct LockMarker {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Hands out exclusive per-order locks
#[derive(Clone, Debug)]
pub struct ConcurrencyGuard {
    store: OrderStore,
    locks: LockTable,
    poll_interval: Duration,
    stale_after: Option<Duration>,
}

impl ConcurrencyGuard {
    /// Guard for orders of `store`
    pub fn new(store: OrderStore, config: &LockConfig) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
            poll_interval: config.poll_interval(),
            stale_after: config.stale_after,
        }
    }

    /// Wait until the order is free and take it
    ///
    /// Fails with `OrderError::NotFound` if the order directory does not exist.
    pub async fn acquire(&self, order: &OrderId) -> Result<OrderLock> {
        let mutex = {
            let mut table = self
                .locks
                .lock()
                .map_err(|_| Error::Lock("lock table poisoned".to_string()))?;
            table.entry(order.clone()).or_default().clone()
        };
        let permit = mutex.clone().lock_owned().await;

        let marker = self.store.layout(order).lock_file();
        let mut waited = false;

        loop {
            match create_marker(&marker).await {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.break_if_stale(order, &marker).await {
                        continue;
                    }
                    if !waited {
                        tracing::info!(
                            tenant_id = %order.tenant_id,
                            order_number = %order.order_number,
                            "Order is locked by another process, waiting"
                        );
                        waited = true;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    drop(permit);
                    drop(mutex);
                    forget_if_idle(&self.locks, order);
                    if e.kind() == std::io::ErrorKind::NotFound {
                        return Err(not_found(order));
                    }
                    return Err(e.into());
                }
            }
        }

        tracing::debug!(
            tenant_id = %order.tenant_id,
            order_number = %order.order_number,
            "Acquired order lock"
        );

        Ok(OrderLock {
            order: order.clone(),
            marker,
            permit: Some(permit),
            locks: self.locks.clone(),
            released: false,
        })
    }

    /// Remove a marker older than `stale_after`; returns whether it was removed
    async fn break_if_stale(&self, order: &OrderId, marker: &std::path::Path) -> bool {
        let Some(stale_after) = self.stale_after else {
            return false;
        };
        let Ok(metadata) = tokio::fs::metadata(marker).await else {
            return false;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        if age < stale_after {
            return false;
        }

        let holder = tokio::fs::read(marker)
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockMarker>(&bytes).ok());
        tracing::warn!(
            tenant_id = %order.tenant_id,
            order_number = %order.order_number,
            age_secs = age.as_secs(),
            holder_pid = holder.as_ref().map(|h| h.pid),
            "Breaking stale order lock"
        );
        tokio::fs::remove_file(marker).await.is_ok()
    }
}

async fn create_marker(path: &std::path::Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let marker = LockMarker {
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    let json = serde_json::to_vec(&marker).map_err(std::io::Error::other)?;
    file.write_all(&json).await?;
    file.flush().await
}

/// An exclusively held order
///
/// Call [`OrderLock::release`] to surface marker-removal failures; dropping
/// the lock releases it as well, logging instead of failing.
#[derive(Debug)]
pub struct OrderLock {
    order: OrderId,
    marker: PathBuf,
    permit: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
    released: bool,
}

impl OrderLock {
    /// The locked order
    pub fn order(&self) -> &OrderId {
        &self.order
    }

    /// Remove the marker and free the order
    ///
    /// The in-process lock is freed even when removing the marker fails.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        std::fs::remove_file(&self.marker).map_err(|e| {
            Error::Lock(format!(
                "failed to remove lock marker {}: {e}",
                self.marker.display()
            ))
        })?;
        tracing::debug!(order = %self.order, "Released order lock");
        Ok(())
    }

    /// Release the lock once the guarded work produced `outcome`
    ///
    /// A failed outcome wins over a failed release, which is then only logged.
    pub fn release_with<T>(self, outcome: Result<T>) -> Result<T> {
        let order = self.order.clone();
        match (outcome, self.release()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                tracing::warn!(
                    order = %order,
                    error = %release_error,
                    "Failed to release order lock after a failed operation"
                );
                Err(e)
            }
        }
    }

    /// Free the order after its directory, marker included, was removed
    pub fn release_deleted(mut self) {
        self.released = true;
        tracing::debug!(order = %self.order, "Released lock of deleted order");
    }
}

impl Drop for OrderLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_file(&self.marker) {
                tracing::warn!(
                    order = %self.order,
                    error = %e,
                    "Failed to remove lock marker on drop"
                );
            } else {
                tracing::debug!(order = %self.order, "Released order lock on drop");
            }
        }

        drop(self.permit.take());
        forget_if_idle(&self.locks, &self.order);
    }
}

/// Forget the per-order mutex once nobody holds or waits for it
fn forget_if_idle(locks: &LockTable, order: &OrderId) {
    if let Ok(mut table) = locks.lock()
        && table
            .get(order)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
    {
        table.remove(order);
    }
}
