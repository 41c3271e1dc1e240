//! Typed field updates applied atomically by the store.

use chrono::{DateTime, Utc};

use super::state::{Stage, VariantState};
use super::store::ItemError;
use super::types::{Item, PublishRecord, ResolveFailure, TransferRecord, VariantKey};
use crate::policy::healing;

/// One field-level change to an item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemUpdate {
    /// Move to a new stage along the state graph.
    Stage(Stage),
    /// Take ownership: enter an in-progress stage and stamp the claim.
    Claim { stage: Stage, worker_id: String },
    /// Record a resolved direct URL, clearing any earlier failure of the variant.
    DirectUrl { variant: VariantKey, url: String },
    ResolveFailure { variant: VariantKey, error: String },
    Transfer {
        variant: VariantKey,
        record: TransferRecord,
    },
    Publication {
        variant: VariantKey,
        record: PublishRecord,
    },
    /// Stamp `completed_at`.
    Completed,
    /// Increment `error_count` and park or reset the item.
    Failure {
        error: String,
        threshold: u32,
        max_resets: u32,
    },
}

/// Ordered list of updates applied in one transaction.
///
/// A patch may be bound to the worker that claimed the item; the store then
/// rejects it if another worker has taken the item over in the meantime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    owner: Option<String>,
    updates: Vec<ItemUpdate>,
}

impl ItemPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A patch that only applies while `worker_id` holds the claim.
    pub fn owned_by(worker_id: impl Into<String>) -> Self {
        Self {
            owner: Some(worker_id.into()),
            updates: Vec::new(),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn updates(&self) -> &[ItemUpdate] {
        &self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn push(mut self, update: ItemUpdate) -> Self {
        self.updates.push(update);
        self
    }

    pub fn stage(self, stage: Stage) -> Self {
        self.push(ItemUpdate::Stage(stage))
    }

    pub fn claim(self, stage: Stage, worker_id: impl Into<String>) -> Self {
        self.push(ItemUpdate::Claim {
            stage,
            worker_id: worker_id.into(),
        })
    }

    pub fn direct_url(self, variant: VariantKey, url: impl Into<String>) -> Self {
        self.push(ItemUpdate::DirectUrl {
            variant,
            url: url.into(),
        })
    }

    pub fn resolve_failure(self, variant: VariantKey, error: impl Into<String>) -> Self {
        self.push(ItemUpdate::ResolveFailure {
            variant,
            error: error.into(),
        })
    }

    pub fn transfer(self, variant: VariantKey, record: TransferRecord) -> Self {
        self.push(ItemUpdate::Transfer { variant, record })
    }

    pub fn publication(self, variant: VariantKey, record: PublishRecord) -> Self {
        self.push(ItemUpdate::Publication { variant, record })
    }

    pub fn completed(self) -> Self {
        self.push(ItemUpdate::Completed)
    }

    pub fn record_failure(self, error: impl Into<String>, threshold: u32, max_resets: u32) -> Self {
        self.push(ItemUpdate::Failure {
            error: error.into(),
            threshold,
            max_resets,
        })
    }

    /// Check ownership and apply every update in order.
    ///
    /// On error the item may be partially modified; callers apply patches to a
    /// copy inside a transaction and discard it on failure.
    pub fn apply(&self, item: &mut Item, now: DateTime<Utc>) -> Result<(), ItemError> {
        if let Some(owner) = &self.owner {
            if item.claimed_by.as_deref() != Some(owner.as_str()) {
                return Err(ItemError::ClaimLost {
                    item_id: item.id.clone(),
                    owner: item.claimed_by.clone(),
                });
            }
        }

        for update in &self.updates {
            apply_update(item, update, now)?;
        }
        item.last_updated = now;
        Ok(())
    }
}

fn transition(item: &mut Item, to: Stage) -> Result<(), ItemError> {
    if !item.stage.can_transition_to(to) {
        return Err(ItemError::InvalidTransition {
            item_id: item.id.clone(),
            from: item.stage,
            to,
        });
    }
    item.stage = to;
    Ok(())
}

fn invariant(item: &Item, reason: String) -> ItemError {
    ItemError::InvariantViolation {
        item_id: item.id.clone(),
        reason,
    }
}

fn apply_update(item: &mut Item, update: &ItemUpdate, now: DateTime<Utc>) -> Result<(), ItemError> {
    match update {
        ItemUpdate::Stage(stage) => transition(item, *stage),
        ItemUpdate::Claim { stage, worker_id } => {
            if !stage.is_in_progress() {
                return Err(invariant(item, format!("cannot claim into {}", stage)));
            }
            transition(item, *stage)?;
            item.claimed_by = Some(worker_id.clone());
            item.started_at = Some(now);
            item.completed_at = None;
            Ok(())
        }
        ItemUpdate::DirectUrl { variant, url } => {
            if !item.source_links.contains_key(variant) {
                return Err(invariant(item, format!("unknown variant {}", variant)));
            }
            item.direct_urls.insert(variant.clone(), url.clone());
            item.resolve_errors.remove(variant);
            Ok(())
        }
        ItemUpdate::ResolveFailure { variant, error } => {
            if !item.source_links.contains_key(variant) {
                return Err(invariant(item, format!("unknown variant {}", variant)));
            }
            item.resolve_errors.insert(
                variant.clone(),
                ResolveFailure {
                    error: error.clone(),
                    failed_at: now,
                },
            );
            Ok(())
        }
        ItemUpdate::Transfer { variant, record } => {
            if record.state == VariantState::Completed && !item.direct_urls.contains_key(variant) {
                return Err(invariant(
                    item,
                    format!("transfer of {} completed without a direct url", variant),
                ));
            }
            item.transfers.insert(variant.clone(), record.clone());
            Ok(())
        }
        ItemUpdate::Publication { variant, record } => {
            let transferred = item
                .transfers
                .get(variant)
                .is_some_and(TransferRecord::is_completed);
            if !transferred {
                return Err(invariant(
                    item,
                    format!("publication of {} before its transfer completed", variant),
                ));
            }
            item.publications.insert(variant.clone(), record.clone());
            Ok(())
        }
        ItemUpdate::Completed => {
            item.completed_at = Some(now);
            Ok(())
        }
        ItemUpdate::Failure {
            error,
            threshold,
            max_resets,
        } => healing::apply_failure(item, error, *threshold, *max_resets, now).map(|_| ()),
    }
}
