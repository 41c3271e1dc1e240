//! Types for publishing.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::Retryable;

/// Errors that can occur while publishing a file.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Publisher misconfigured: {0}")]
    Config(String),
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PublishError::FileTooLarge { .. } | PublishError::FileNotFound(_) | PublishError::Config(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PublishError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Permanent reference to a published file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRef {
    /// Link stored on the item.
    pub reference: String,
    /// Id on the delivery channel (e.g. a message id).
    pub remote_id: String,
}

/// Delivers a local file to a channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn publish(&self, local_path: &Path, caption: &str) -> Result<PublishedRef, PublishError>;
}
