//! Retry, stall and self-healing policies.

pub mod backoff;
pub mod healing;
pub mod stall;

pub use backoff::{retry, with_timeout, BackoffPolicy, Retryable};
pub use healing::{FailureOutcome, HealingConfig, SelfHealingPolicy};
pub use stall::{Progress, StallConfig, StallDetector};
