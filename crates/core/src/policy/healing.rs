//! Error-count based self-healing.
//!
//! Every failed pass bumps `error_count` and parks the item in `Error`. A
//! parked item becomes claimable again by the worker of its `failed_stage`
//! once the cool-down has passed. When the count reaches the threshold the
//! item is sent back to `Pending` with its stage-derived data cleared, so the
//! whole pipeline runs again from fresh links. After `max_resets` such
//! restarts the item stays in `Error` with no `failed_stage`, which no worker
//! claims, until an operator steps in.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{Item, ItemError, ItemPatch, Stage};

/// Self-healing thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Failures before an item is reset to pending.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Seconds an errored item waits before its stage worker retries it.
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    /// Seconds after which an in-progress item is considered abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Full pipeline restarts before an item is left in error for good.
    #[serde(default = "default_max_resets")]
    pub max_resets: u32,
}

fn default_error_threshold() -> u32 {
    3
}

fn default_error_cooldown_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    3600
}

fn default_max_resets() -> u32 {
    5
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            error_cooldown_secs: default_error_cooldown_secs(),
            stale_after_secs: default_stale_after_secs(),
            max_resets: default_max_resets(),
        }
    }
}

impl HealingConfig {
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// What a recorded failure did to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Parked in `Error` with the new count.
    Errored { error_count: u32 },
    /// Threshold reached; back to `Pending`.
    Reset,
    /// Threshold reached with no resets left; left in `Error` unclaimable.
    Exhausted,
}

/// Increment the error count, then either park the item or reset it.
///
/// Runs inside the store transaction that persists the result.
pub(crate) fn apply_failure(
    item: &mut Item,
    error: &str,
    threshold: u32,
    max_resets: u32,
    now: DateTime<Utc>,
) -> Result<FailureOutcome, ItemError> {
    if !item.stage.can_transition_to(Stage::Error) {
        return Err(ItemError::InvalidTransition {
            item_id: item.id.clone(),
            from: item.stage,
            to: Stage::Error,
        });
    }

    if item.stage.is_in_progress() {
        item.failed_stage = Some(item.stage);
    }
    item.error_count = item.error_count.saturating_add(1);
    item.last_error = Some(error.to_string());
    item.last_error_at = Some(now);
    item.stage = Stage::Error;

    if item.error_count < threshold.max(1) {
        return Ok(FailureOutcome::Errored {
            error_count: item.error_count,
        });
    }

    if item.reset_count >= max_resets {
        item.failed_stage = None;
        item.claimed_by = None;
        return Ok(FailureOutcome::Exhausted);
    }

    reset_to_pending(item);
    item.reset_count += 1;
    Ok(FailureOutcome::Reset)
}

/// Clears failure tracking and everything derived from the source links,
/// keeping publications so nothing is published twice.
fn reset_to_pending(item: &mut Item) {
    item.stage = Stage::Pending;
    item.error_count = 0;
    item.last_error = None;
    item.last_error_at = None;
    item.failed_stage = None;
    item.claimed_by = None;
    item.started_at = None;
    item.direct_urls.clear();
    item.resolve_errors.clear();
    item.transfers.clear();
    item.publications.retain(|_, record| record.is_published());
}

/// Builds failure patches and classifies their effect.
#[derive(Debug, Clone)]
pub struct SelfHealingPolicy {
    threshold: u32,
    max_resets: u32,
}

impl SelfHealingPolicy {
    pub fn new(config: &HealingConfig) -> Self {
        Self {
            threshold: config.error_threshold.max(1),
            max_resets: config.max_resets,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn max_resets(&self) -> u32 {
        self.max_resets
    }

    pub fn failure_patch(&self, worker_id: &str, error: &str) -> ItemPatch {
        ItemPatch::owned_by(worker_id).record_failure(error, self.threshold, self.max_resets)
    }

    /// Classify the post-update item returned by the store.
    pub fn outcome(&self, item: &Item) -> FailureOutcome {
        if item.stage == Stage::Pending {
            FailureOutcome::Reset
        } else if item.error_count >= self.threshold && item.failed_stage.is_none() {
            FailureOutcome::Exhausted
        } else {
            FailureOutcome::Errored {
                error_count: item.error_count,
            }
        }
    }
}
