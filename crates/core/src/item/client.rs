//! Async access to a blocking item store.
//!
//! Store calls run on the blocking thread pool, each attempt bounded by a
//! timeout, with transient failures retried per the backoff policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task;

use super::{ClaimFilter, Item, ItemError, ItemPatch, ItemStore};
use crate::policy::{retry, with_timeout, BackoffPolicy};

#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn ItemStore>,
    timeout: Duration,
    policy: BackoffPolicy,
}

impl StoreClient {
    pub fn new(store: Arc<dyn ItemStore>, timeout: Duration, policy: BackoffPolicy) -> Self {
        Self {
            store,
            timeout,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    async fn call<T, F>(&self, name: &str, op: F) -> Result<T, ItemError>
    where
        T: Send + 'static,
        F: Fn(&dyn ItemStore) -> Result<T, ItemError> + Clone + Send + Sync + 'static,
    {
        retry(&self.policy, name, |_| {
            let store = Arc::clone(&self.store);
            let op = op.clone();
            with_timeout(
                self.timeout,
                async move {
                    task::spawn_blocking(move || op(store.as_ref()))
                        .await
                        .map_err(|e| ItemError::Database(format!("store task failed: {}", e)))?
                },
                || ItemError::Timeout,
            )
        })
        .await
    }

    /// Atomically claim the oldest item matching `filter`.
    pub async fn claim(
        &self,
        filter: &ClaimFilter,
        patch: &ItemPatch,
    ) -> Result<Option<Item>, ItemError> {
        let filter = filter.clone();
        let patch = patch.clone();
        self.call("store.claim", move |store| store.claim(&filter, &patch))
            .await
    }

    /// Apply a patch and return the post-update item.
    pub async fn update(&self, id: &str, patch: ItemPatch) -> Result<Item, ItemError> {
        let id = id.to_string();
        self.call("store.update", move |store| store.update(&id, &patch))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Item>, ItemError> {
        let id = id.to_string();
        self.call("store.get", move |store| store.get(&id)).await
    }
}
