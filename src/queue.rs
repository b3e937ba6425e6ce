//! Background execution of fulfillment jobs
//!
//! Each submitted job gets a task id and runs on its own tokio task once a
//! worker permit is free. Statuses live in memory only; they are lost on
//! restart, while the run reports persist in the order's `logs/` directory.
//! Finished statuses are dropped once they are older than the configured
//! retention.

use crate::config::WorkerConfig;
use crate::fulfillment::Fulfiller;
use crate::types::{FulfillmentJob, TaskId, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

struct TaskEntry {
    status: TaskStatus,
    finished_at: Option<Instant>,
}

impl TaskEntry {
    fn expired(&self, now: Instant, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }
}

/// Bounded pool of fulfillment workers
#[derive(Clone)]
pub struct JobQueue {
    fulfiller: Fulfiller,
    concurrent_limit: Arc<Semaphore>,
    statuses: Arc<RwLock<HashMap<TaskId, TaskEntry>>>,
    retention: Duration,
}

impl JobQueue {
    /// Queue running at most `max_concurrent_jobs` jobs at once
    pub fn new(fulfiller: Fulfiller, config: &WorkerConfig) -> Self {
        Self {
            fulfiller,
            concurrent_limit: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            retention: config.status_retention,
        }
    }

    /// Enqueue `job` and return its task id
    pub async fn submit(&self, job: FulfillmentJob) -> TaskId {
        let id = Uuid::new_v4();
        self.set_status(id, TaskStatus::Queued).await;

        tracing::info!(
            task_id = %id,
            request_id = %job.request_id,
            tenant_id = %job.tenant_id,
            order_number = %job.order_number,
            "Queued fulfillment job"
        );

        let queue = self.clone();
        tokio::spawn(async move {
            let permit = queue.concurrent_limit.clone().acquire_owned().await;
            let Ok(_permit) = permit else {
                queue
                    .set_status(
                        id,
                        TaskStatus::Failed {
                            message: "job queue is shut down".to_string(),
                        },
                    )
                    .await;
                return;
            };

            queue.set_status(id, TaskStatus::Running).await;
            let status = match queue.fulfiller.run(job).await {
                Ok(report) => TaskStatus::Completed { report },
                Err(e) => {
                    tracing::error!(task_id = %id, error = %e, "Fulfillment job failed");
                    TaskStatus::Failed {
                        message: e.to_string(),
                    }
                }
            };
            queue.set_status(id, status).await;
        });

        id
    }

    /// Current status of a task, if the id is known and not yet evicted
    pub async fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        let statuses = self.statuses.read().await;
        let entry = statuses.get(id)?;
        if entry.expired(Instant::now(), self.retention) {
            return None;
        }
        Some(entry.status.clone())
    }

    /// Stop handing out worker permits; queued jobs fail, running ones finish
    pub fn close(&self) {
        self.concurrent_limit.close();
    }

    /// Record `status`, evicting finished tasks past the retention period
    async fn set_status(&self, id: TaskId, status: TaskStatus) {
        let now = Instant::now();
        let finished_at = match status {
            TaskStatus::Queued | TaskStatus::Running => None,
            TaskStatus::Completed { .. } | TaskStatus::Failed { .. } => Some(now),
        };

        let mut statuses = self.statuses.write().await;
        let before = statuses.len();
        statuses.retain(|_, entry| !entry.expired(now, self.retention));
        let evicted = before - statuses.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished task statuses");
        }
        statuses.insert(
            id,
            TaskEntry {
                status,
                finished_at,
            },
        );
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.statuses.read().await.len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use crate::callback::CallbackClient;
    use crate::config::{CallbackConfig, LockConfig, NetworkConfig, RetryConfig};
    use crate::fetcher::Fetcher;
    use crate::guard::ConcurrencyGuard;
    use crate::order::OrderStore;
    use crate::types::OrderId;
    use std::time::Duration;
    use tempfile::tempdir;

    fn queue(store: &OrderStore) -> JobQueue {
        queue_with_retention(store, Duration::from_secs(3600))
    }

    fn queue_with_retention(store: &OrderStore, status_retention: Duration) -> JobQueue {
        let retry = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        let fulfiller = Fulfiller::new(
            store.clone(),
            Fetcher::new(&NetworkConfig {
                retry: retry.clone(),
                ..NetworkConfig::default()
            })
            .unwrap(),
            ArchiveBuilder::with_max_size(1024 * 1024),
            ConcurrencyGuard::new(store.clone(), &LockConfig::default()),
            CallbackClient::new(&CallbackConfig::default(), retry),
        );
        JobQueue::new(
            fulfiller,
            &WorkerConfig {
                max_concurrent_jobs: 2,
                status_retention,
            },
        )
    }

    fn job(order_number: &str) -> FulfillmentJob {
        FulfillmentJob {
            request_id: "req".into(),
            tenant_id: "acme".into(),
            order_number: order_number.into(),
            downloads: vec![],
            debug: true,
        }
    }

    async fn wait_for_terminal(queue: &JobQueue, id: TaskId) -> TaskStatus {
        for _ in 0..200 {
            match queue.status(&id).await {
                Some(TaskStatus::Queued | TaskStatus::Running) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Some(status) => return status,
                None => panic!("unknown task id"),
            }
        }
        panic!("task did not finish");
    }

    #[tokio::test]
    async fn completed_job_exposes_report() {
        let dir = tempdir().unwrap();
        let store = OrderStore::new(dir.path());
        store
            .create(&OrderId::new("acme", "1").unwrap())
            .await
            .unwrap();
        let queue = queue(&store);

        let id = queue.submit(job("1")).await;
        match wait_for_terminal(&queue, id).await {
            TaskStatus::Completed { report } => {
                assert_eq!(report.order_number, "1");
                assert!(report.errors.is_empty());
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_error_marks_job_failed() {
        let dir = tempdir().unwrap();
        let store = OrderStore::new(dir.path());
        let queue = queue(&store);

        let id = queue.submit(job("missing")).await;
        match wait_for_terminal(&queue, id).await {
            TaskStatus::Failed { message } => assert!(message.contains("does not exist")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_task_has_no_status() {
        let dir = tempdir().unwrap();
        let queue = queue(&OrderStore::new(dir.path()));
        assert!(queue.status(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn closed_queue_fails_new_jobs() {
        let dir = tempdir().unwrap();
        let queue = queue(&OrderStore::new(dir.path()));
        queue.close();

        let id = queue.submit(job("1")).await;
        match wait_for_terminal(&queue, id).await {
            TaskStatus::Failed { message } => assert!(message.contains("shut down")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn finished_statuses_are_evicted_after_retention() {
        let dir = tempdir().unwrap();
        let store = OrderStore::new(dir.path());
        store
            .create(&OrderId::new("acme", "1").unwrap())
            .await
            .unwrap();
        let queue = queue_with_retention(&store, Duration::from_millis(200));

        let first = queue.submit(job("1")).await;
        assert!(matches!(
            wait_for_terminal(&queue, first).await,
            TaskStatus::Completed { .. }
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(queue.status(&first).await.is_none());

        let second = queue.submit(job("1")).await;
        wait_for_terminal(&queue, second).await;
        assert_eq!(queue.tracked().await, 1, "old status still held");
    }

    #[tokio::test]
    async fn unfinished_statuses_are_never_evicted() {
        let dir = tempdir().unwrap();
        let queue = queue_with_retention(&OrderStore::new(dir.path()), Duration::ZERO);

        let id = Uuid::new_v4();
        queue.set_status(id, TaskStatus::Running).await;
        queue.set_status(Uuid::new_v4(), TaskStatus::Queued).await;

        assert!(matches!(
            queue.status(&id).await,
            Some(TaskStatus::Running)
        ));
        assert_eq!(queue.tracked().await, 2);
    }
}
