//! Types for transfer operations.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::Retryable;

/// Errors that can occur during transfers.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The transfer itself failed on the daemon side.
    #[error("Transfer failed: {0}")]
    Failed(String),

    #[error("Transfer stalled: no progress for {samples} samples at {completed_bytes} bytes")]
    Stalled { samples: u32, completed_bytes: u64 },

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::ConnectionFailed(_)
                | TransferError::Rpc { .. }
                | TransferError::Timeout
                | TransferError::InvalidResponse(_)
        )
    }
}

/// Opaque id of a running transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferHandle(pub String);

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle phase reported by the transporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Active,
    Waiting,
    Paused,
    /// The transporter itself decided there is no progress.
    Stalled,
    Complete,
    Error,
    Removed,
}

impl TransferPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Active => "active",
            TransferPhase::Waiting => "waiting",
            TransferPhase::Paused => "paused",
            TransferPhase::Stalled => "stalled",
            TransferPhase::Complete => "complete",
            TransferPhase::Error => "error",
            TransferPhase::Removed => "removed",
        }
    }
}

/// Snapshot of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub phase: TransferPhase,
    pub completed_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second.
    pub speed: u64,
    /// Local file, known once the transporter has picked a name.
    pub local_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl TransferStatus {
    /// Progress as a fraction (0.0 - 1.0).
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.completed_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Moves a direct URL to a local file.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Start a transfer into `dest_dir`.
    async fn start(&self, url: &str, dest_dir: &Path) -> Result<TransferHandle, TransferError>;

    async fn status(&self, handle: &TransferHandle) -> Result<TransferStatus, TransferError>;

    /// Stop the transfer and forget it.
    async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError>;
}
