//! Supervision of every configured worker.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::item::{ItemStore, StoreClient};
use crate::publisher::Publisher;
use crate::resolver::Resolver;
use crate::transporter::Transporter;

use super::runner::{StageProcessor, Worker, WorkerHandle, WorkerSettings};
use super::stages::{PublishStage, ResolveStage, TransferStage};
use super::types::{WorkerError, WorkerRole, WorkerStatus};

/// External services the stages talk to. A role with workers needs its collaborator.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub resolver: Option<Arc<dyn Resolver>>,
    pub transporter: Option<Arc<dyn Transporter>>,
    pub publisher: Option<Arc<dyn Publisher>>,
}

fn missing(role: WorkerRole) -> WorkerError {
    WorkerError::Setup(format!("{} workers configured without a collaborator", role))
}

/// All running workers.
pub struct WorkerPool {
    handles: Mutex<Vec<WorkerHandle>>,
    statuses: Vec<Arc<RwLock<WorkerStatus>>>,
}

impl WorkerPool {
    /// Spawn `count` workers per role, staggered by `workers.stagger_ms`.
    pub async fn start(
        config: &Config,
        store: Arc<dyn ItemStore>,
        collaborators: Collaborators,
    ) -> Result<Self, WorkerError> {
        let workers = &config.workers;
        let client = StoreClient::new(store, workers.store_timeout(), config.retry.clone());
        let settings = WorkerSettings {
            poll_interval: workers.poll_interval(),
            error_retry_delay: workers.error_retry_delay(),
            retry: config.retry.clone(),
            healing: config.healing.clone(),
            scan_limit: workers.scan_limit,
        };

        let mut planned: Vec<(Arc<dyn StageProcessor>, usize)> = Vec::new();
        if workers.resolve.count > 0 {
            let resolver = collaborators
                .resolver
                .clone()
                .ok_or_else(|| missing(WorkerRole::Resolve))?;
            planned.push((
                Arc::new(ResolveStage::new(resolver, workers.call_timeout(WorkerRole::Resolve))),
                workers.resolve.count,
            ));
        }
        if workers.transfer.count > 0 {
            let transporter = collaborators
                .transporter
                .clone()
                .ok_or_else(|| missing(WorkerRole::Transfer))?;
            tokio::fs::create_dir_all(&workers.transfer.download_dir)
                .await
                .map_err(|e| {
                    WorkerError::Setup(format!(
                        "cannot create {}: {}",
                        workers.transfer.download_dir.display(),
                        e
                    ))
                })?;
            planned.push((
                Arc::new(TransferStage::new(
                    transporter,
                    workers.transfer.download_dir.clone(),
                    workers.call_timeout(WorkerRole::Transfer),
                    config.stall.clone(),
                )),
                workers.transfer.count,
            ));
        }
        if workers.publish.count > 0 {
            let publisher = collaborators
                .publisher
                .clone()
                .ok_or_else(|| missing(WorkerRole::Publish))?;
            planned.push((
                Arc::new(PublishStage::new(
                    publisher,
                    workers.call_timeout(WorkerRole::Publish),
                    workers.publish.delete_after_publish,
                )),
                workers.publish.count,
            ));
        }

        let mut handles = Vec::new();
        for (processor, count) in planned {
            for _ in 0..count {
                let worker = Worker::new(Arc::clone(&processor), client.clone(), settings.clone())?;
                if !handles.is_empty() && !workers.stagger().is_zero() {
                    tokio::time::sleep(workers.stagger()).await;
                }
                info!("Starting {} worker {}", worker.role(), worker.id());
                handles.push(worker.spawn());
            }
        }

        info!("Worker pool started with {} workers", handles.len());
        let statuses = handles.iter().map(WorkerHandle::status_cell).collect();
        Ok(Self {
            handles: Mutex::new(handles),
            statuses,
        })
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Snapshot of every worker, in start order.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.statuses
            .iter()
            .map(|cell| match cell.read() {
                Ok(status) => status.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            })
            .collect()
    }

    /// Stop every worker concurrently. Calling it twice is a no-op.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<WorkerHandle> = std::mem::take(&mut *self.handles.lock().await);
        if handles.is_empty() {
            return;
        }
        info!("Stopping {} workers (grace {:?})", handles.len(), grace);
        for handle in &handles {
            handle.request_stop();
        }
        join_all(handles.into_iter().map(|handle| handle.stop(grace))).await;
        info!("All workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::SqliteItemStore;
    use crate::testing::MockResolver;

    fn resolve_only() -> Config {
        let mut config = Config::default();
        config.workers.stagger_ms = 0;
        config.workers.poll_interval_ms = 10;
        config.workers.resolve.count = 2;
        config.workers.transfer.count = 0;
        config.workers.publish.count = 0;
        config
    }

    #[tokio::test]
    async fn test_pool_starts_and_stops() {
        let store = Arc::new(SqliteItemStore::in_memory().unwrap());
        let collaborators = Collaborators {
            resolver: Some(Arc::new(MockResolver::new())),
            ..Default::default()
        };

        let pool = WorkerPool::start(&resolve_only(), store, collaborators)
            .await
            .unwrap();
        assert_eq!(pool.len(), 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool
            .statuses()
            .iter()
            .all(|s| s.role == WorkerRole::Resolve && s.running));

        pool.shutdown(Duration::from_secs(1)).await;
        assert!(pool.statuses().iter().all(|s| !s.running));
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_pool_requires_collaborators() {
        let store = Arc::new(SqliteItemStore::in_memory().unwrap());
        let result = WorkerPool::start(&resolve_only(), store, Collaborators::default()).await;
        assert!(matches!(result, Err(WorkerError::Setup(_))));
    }
}
