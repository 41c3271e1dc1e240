use std::sync::Arc;

use mediarelay_core::{Config, ItemStore, WorkerPool, WorkerStatus};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn ItemStore>,
    workers: Option<Arc<WorkerPool>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ItemStore>, workers: Option<Arc<WorkerPool>>) -> Self {
        Self {
            config,
            store,
            workers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn ItemStore {
        self.store.as_ref()
    }

    /// Worker snapshots, empty when this process runs no workers.
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.workers
            .as_ref()
            .map(|pool| pool.statuses())
            .unwrap_or_default()
    }
}
