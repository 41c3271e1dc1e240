//! Types for stage workers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::{ItemError, Stage};
use crate::publisher::PublishError;
use crate::resolver::ResolveError;
use crate::transporter::TransferError;

/// Which stage a worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Resolve,
    Transfer,
    Publish,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 3] = [WorkerRole::Resolve, WorkerRole::Transfer, WorkerRole::Publish];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Resolve => "resolve",
            WorkerRole::Transfer => "transfer",
            WorkerRole::Publish => "publish",
        }
    }

    /// Stage the worker picks items up from.
    pub fn ready_stage(&self) -> Stage {
        match self {
            WorkerRole::Resolve => Stage::Pending,
            WorkerRole::Transfer => Stage::ReadyForTransfer,
            WorkerRole::Publish => Stage::ReadyForPublish,
        }
    }

    /// In-progress stage while the worker holds an item.
    pub fn claim_stage(&self) -> Stage {
        match self {
            WorkerRole::Resolve => Stage::Resolving,
            WorkerRole::Transfer => Stage::Transferring,
            WorkerRole::Publish => Stage::Publishing,
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that fail a whole stage pass.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] ItemError),

    #[error("resolver error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// No variant made it through the stage.
    #[error("{0}")]
    StageFailed(String),

    /// Hard abort during shutdown; the item keeps its in-progress stage.
    #[error("aborted during shutdown")]
    Aborted,

    /// Worker could not be built from its configuration.
    #[error("worker setup failed: {0}")]
    Setup(String),
}

/// What one poll of a worker did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing eligible.
    Idle,
    /// Item advanced to `stage`.
    Processed { item_id: String, stage: Stage },
    /// Pass failed and the failure was recorded.
    Failed { item_id: String, stage: Stage },
    /// Another worker reclaimed the item mid-pass.
    ClaimLost { item_id: String },
    /// Claim or failure bookkeeping could not reach the store.
    StoreUnavailable,
    /// Abort fired mid-item; item left for the stale reclaim.
    Aborted { item_id: String },
}

/// Snapshot of one worker for the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub role: WorkerRole,
    pub worker_id: String,
    pub running: bool,
    /// Item currently held, if any.
    pub active_item: Option<String>,
    pub processed: u64,
    pub failures: u64,
}

impl WorkerStatus {
    pub fn new(role: WorkerRole, worker_id: impl Into<String>) -> Self {
        Self {
            role,
            worker_id: worker_id.into(),
            running: false,
            active_item: None,
            processed: 0,
            failures: 0,
        }
    }
}
