//! Mock publisher for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::publisher::{PublishError, PublishedRef, Publisher};

/// A recorded publish call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub path: PathBuf,
    pub caption: String,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<RecordedPublish>,
    failures: HashMap<PathBuf, String>,
    rate_limits: u32,
    rate_limit_after: Duration,
    next_id: u64,
}

/// Mock implementation of the Publisher trait.
///
/// Successful publishes return `mock://published/<n>` references.
#[derive(Debug, Default)]
pub struct MockPublisher {
    state: Mutex<State>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject `path` with an API error on every call.
    pub fn fail_path(&self, path: &Path, message: &str) {
        self.state()
            .failures
            .insert(path.to_path_buf(), message.to_string());
    }

    /// Answer the next `times` calls with a rate limit.
    pub fn rate_limit(&self, times: u32, retry_after: Duration) {
        let mut state = self.state();
        state.rate_limits = times;
        state.rate_limit_after = retry_after;
    }

    pub fn calls(&self) -> Vec<RecordedPublish> {
        self.state().calls.clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn publish(&self, local_path: &Path, caption: &str) -> Result<PublishedRef, PublishError> {
        let mut state = self.state();
        state.calls.push(RecordedPublish {
            path: local_path.to_path_buf(),
            caption: caption.to_string(),
            timestamp: Utc::now(),
        });

        if state.rate_limits > 0 {
            state.rate_limits -= 1;
            return Err(PublishError::RateLimited {
                retry_after: state.rate_limit_after,
            });
        }
        if let Some(message) = state.failures.get(local_path) {
            return Err(PublishError::Api(message.clone()));
        }

        state.next_id += 1;
        Ok(PublishedRef {
            reference: format!("mock://published/{}", state.next_id),
            remote_id: state.next_id.to_string(),
        })
    }
}
