//! Pipeline stages and per-variant states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authoritative pipeline position of an item.
///
/// State machine flow:
/// ```text
/// Pending -> Resolving -> ReadyForTransfer -> Transferring -> ReadyForPublish -> Publishing -> Completed
///
/// Any non-terminal state can transition to Error.
/// Error -> Pending only through the self-healing reset.
/// Error -> Resolving/Transferring/Publishing when a cooled-down item is re-claimed.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Created, waiting for link resolution.
    Pending,
    /// Claimed by a resolve worker.
    Resolving,
    /// At least one variant has a direct URL.
    ReadyForTransfer,
    /// Claimed by a transfer worker.
    Transferring,
    /// At least one variant has a local file.
    ReadyForPublish,
    /// Claimed by a publish worker.
    Publishing,
    /// Every transferred variant was published.
    Completed,
    /// A pass failed as a whole; see `last_error`.
    Error,
}

/// Error returned when parsing an unknown stage name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stage: {0}")]
pub struct ParseStageError(pub String);

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 8] = [
        Stage::Pending,
        Stage::Resolving,
        Stage::ReadyForTransfer,
        Stage::Transferring,
        Stage::ReadyForPublish,
        Stage::Publishing,
        Stage::Completed,
        Stage::Error,
    ];

    /// Returns the stage as stored and filtered on.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Resolving => "resolving",
            Stage::ReadyForTransfer => "ready_for_transfer",
            Stage::Transferring => "transferring",
            Stage::ReadyForPublish => "ready_for_publish",
            Stage::Publishing => "publishing",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }

    /// Returns true for `Completed` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }

    /// Returns true if a worker currently holds the item.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Stage::Resolving | Stage::Transferring | Stage::Publishing
        )
    }

    /// The in-progress stage a worker moves a ready item into when claiming it.
    pub fn claim_stage(&self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Resolving),
            Stage::ReadyForTransfer => Some(Stage::Transferring),
            Stage::ReadyForPublish => Some(Stage::Publishing),
            _ => None,
        }
    }

    /// The stage a successful pass of an in-progress stage advances to.
    pub fn success_stage(&self) -> Option<Stage> {
        match self {
            Stage::Resolving => Some(Stage::ReadyForTransfer),
            Stage::Transferring => Some(Stage::ReadyForPublish),
            Stage::Publishing => Some(Stage::Completed),
            _ => None,
        }
    }

    /// Can an item move from `self` to `to`?
    pub fn can_transition_to(self, to: Stage) -> bool {
        use Stage::*;
        match (self, to) {
            (Pending, Resolving)
            | (Resolving, ReadyForTransfer)
            | (ReadyForTransfer, Transferring)
            | (Transferring, ReadyForPublish)
            | (ReadyForPublish, Publishing)
            | (Publishing, Completed) => true,
            // stale reclaim re-enters the same in-progress stage
            (from, to) if from == to => from.is_in_progress(),
            (from, Error) => !from.is_terminal(),
            (Error, Pending) => true,
            (Error, to) => to.is_in_progress(),
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

/// Per-variant progress within one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantState {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

impl VariantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantState::Pending => "pending",
            VariantState::Processing => "processing",
            VariantState::Completed => "completed",
            VariantState::Error => "error",
        }
    }
}

/// Item-level decision after all variants of a pass have been attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageVerdict {
    /// At least one path forward exists.
    Advance,
    /// Nothing succeeded; the pass fails as a whole.
    Fail(String),
}

impl StageVerdict {
    pub fn is_advance(&self) -> bool {
        matches!(self, StageVerdict::Advance)
    }
}
