//! Types for link resolution.

use async_trait::async_trait;
use thiserror::Error;

use crate::policy::Retryable;

/// Errors that can occur while resolving a source link.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("No direct link found: {0}")]
    Unresolvable(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Resolver misconfigured: {0}")]
    Config(String),
}

impl Retryable for ResolveError {
    fn is_retryable(&self) -> bool {
        !matches!(self, ResolveError::InvalidUrl(_) | ResolveError::Config(_))
    }
}

/// Turns a source page link into a direct transfer URL.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn resolve(&self, source_url: &str) -> Result<String, ResolveError>;
}
