//! Item storage trait, claim filters and errors.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::patch::ItemPatch;
use super::state::Stage;
use super::types::{Item, ItemMetadata, VariantKey};
use crate::policy::Retryable;

/// Error type for item operations.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("invalid transition for item {item_id}: {from} -> {to}")]
    InvalidTransition {
        item_id: String,
        from: Stage,
        to: Stage,
    },

    #[error("invariant violated for item {item_id}: {reason}")]
    InvariantViolation { item_id: String, reason: String },

    /// The patch was bound to a worker that no longer holds the item.
    #[error("claim on item {item_id} lost (now held by {owner:?})")]
    ClaimLost {
        item_id: String,
        owner: Option<String>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("store call timed out")]
    Timeout,
}

impl Retryable for ItemError {
    fn is_retryable(&self) -> bool {
        matches!(self, ItemError::Database(_) | ItemError::Timeout)
    }
}

impl From<rusqlite::Error> for ItemError {
    fn from(e: rusqlite::Error) -> Self {
        ItemError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for ItemError {
    fn from(e: serde_json::Error) -> Self {
        ItemError::Database(format!("corrupt item document: {}", e))
    }
}

/// Request to create a new item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateItemRequest {
    pub source_links: BTreeMap<VariantKey, String>,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl CreateItemRequest {
    pub fn validate(&self) -> Result<(), ItemError> {
        if self.source_links.is_empty() {
            return Err(ItemError::InvalidRequest(
                "at least one source link is required".to_string(),
            ));
        }
        if let Some((variant, _)) = self
            .source_links
            .iter()
            .find(|(k, url)| k.as_str().trim().is_empty() || url.trim().is_empty())
        {
            return Err(ItemError::InvalidRequest(format!(
                "empty variant key or source link for '{}'",
                variant
            )));
        }
        Ok(())
    }
}

/// Filter for listing items.
#[derive(Debug, Clone)]
pub struct ItemFilter {
    pub stage: Option<Stage>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemFilter {
    pub fn new() -> Self {
        Self {
            stage: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Data an item must carry before a stage worker will take it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Has source links and nothing resolved yet.
    Unresolved,
    /// Has at least one direct URL.
    Resolved,
    /// Has at least one completed transfer.
    Transferred,
}

impl Requirement {
    pub fn holds(&self, item: &Item) -> bool {
        match self {
            Requirement::Unresolved => {
                !item.source_links.is_empty() && item.direct_urls.is_empty()
            }
            Requirement::Resolved => !item.direct_urls.is_empty(),
            Requirement::Transferred => item.transfers.values().any(|t| t.is_completed()),
        }
    }
}

/// Eligibility filter for one stage worker.
///
/// An item matches when it is either
/// - in the ready stage and satisfies the requirement,
/// - in the claim stage and has not been touched for `stale_after`,
/// - in `Error` with `failed_stage` equal to the claim stage and a
///   `last_error_at` older than `error_cooldown`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimFilter {
    pub ready_stage: Stage,
    pub claim_stage: Stage,
    pub requirement: Requirement,
    pub stale_after: Option<Duration>,
    pub error_cooldown: Option<Duration>,
    /// Candidates examined per claim, oldest first.
    pub scan_limit: usize,
}

impl ClaimFilter {
    /// Filter for the worker that picks items up from `ready_stage`.
    pub fn for_stage(ready_stage: Stage) -> Option<Self> {
        let requirement = match ready_stage {
            Stage::Pending => Requirement::Unresolved,
            Stage::ReadyForTransfer => Requirement::Resolved,
            Stage::ReadyForPublish => Requirement::Transferred,
            _ => return None,
        };
        Some(Self {
            ready_stage,
            claim_stage: ready_stage.claim_stage()?,
            requirement,
            stale_after: None,
            error_cooldown: None,
            scan_limit: 50,
        })
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn with_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_cooldown = Some(cooldown);
        self
    }

    pub fn with_scan_limit(mut self, scan_limit: usize) -> Self {
        self.scan_limit = scan_limit.max(1);
        self
    }

    /// Last-touched time at or before which a claim-stage item counts as stale.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.stale_after.and_then(|age| cutoff(age, now))
    }

    /// Failure time at or before which an `Error` item has cooled down.
    pub fn error_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.error_cooldown.and_then(|age| cutoff(age, now))
    }

    pub fn matches(&self, item: &Item, now: DateTime<Utc>) -> bool {
        if item.stage == self.ready_stage {
            return self.requirement.holds(item);
        }

        if item.stage == self.claim_stage {
            return match self.stale_cutoff(now) {
                Some(cutoff) => item.last_updated <= cutoff && !item.source_links.is_empty(),
                None => false,
            };
        }

        if item.stage == Stage::Error && item.failed_stage == Some(self.claim_stage) {
            return match (self.error_cutoff(now), item.last_error_at) {
                (Some(cutoff), Some(at)) => at <= cutoff,
                (Some(_), None) => true,
                (None, _) => false,
            };
        }

        false
    }

    /// Patch that moves a matched item into the claim stage for `worker_id`.
    pub fn claim_patch(&self, worker_id: &str) -> ItemPatch {
        ItemPatch::new().claim(self.claim_stage, worker_id)
    }
}

fn cutoff(age: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
}

/// Trait for item storage backends.
///
/// Every mutation is an atomic read-modify-write of a single item; there is
/// no other coordination between workers.
pub trait ItemStore: Send + Sync {
    /// Create a pending item.
    fn create(&self, request: CreateItemRequest) -> Result<Item, ItemError>;

    /// Get an item by ID.
    fn get(&self, id: &str) -> Result<Option<Item>, ItemError>;

    /// List items matching the filter, oldest first.
    fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>, ItemError>;

    /// Number of items in each stage. Stages without items are omitted.
    fn count_by_stage(&self) -> Result<BTreeMap<Stage, i64>, ItemError>;

    /// Find the oldest item matching `filter`, apply `patch` to it and return
    /// the post-update item, all in one atomic step. `None` when nothing matches.
    fn claim(&self, filter: &ClaimFilter, patch: &ItemPatch) -> Result<Option<Item>, ItemError>;

    /// Apply `patch` to one item atomically and return the post-update item.
    fn update(&self, id: &str, patch: &ItemPatch) -> Result<Item, ItemError>;
}
