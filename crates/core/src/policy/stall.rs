//! Stall detection for transfer progress.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transfer sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StallConfig {
    /// Interval between progress samples in milliseconds.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Consecutive samples without byte progress before the transfer is failed.
    #[serde(default = "default_max_unchanged_samples")]
    pub max_unchanged_samples: u32,
    /// Persist progress to the store every N samples.
    #[serde(default = "default_persist_every_samples")]
    pub persist_every_samples: u32,
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_max_unchanged_samples() -> u32 {
    120
}

fn default_persist_every_samples() -> u32 {
    10
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            max_unchanged_samples: default_max_unchanged_samples(),
            persist_every_samples: default_persist_every_samples(),
        }
    }
}

impl StallConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Result of feeding one sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Bytes moved since the previous sample (or this is the first sample).
    Advanced,
    /// No movement, but still under the limit.
    Unchanged { samples: u32 },
    /// No movement for the configured number of samples.
    Stalled { samples: u32 },
}

/// Counts consecutive samples with an identical completed-byte count.
#[derive(Debug, Clone)]
pub struct StallDetector {
    max_unchanged: u32,
    last_completed: Option<u64>,
    unchanged: u32,
}

impl StallDetector {
    pub fn new(max_unchanged_samples: u32) -> Self {
        Self {
            max_unchanged: max_unchanged_samples.max(1),
            last_completed: None,
            unchanged: 0,
        }
    }

    pub fn observe(&mut self, completed_bytes: u64) -> Progress {
        match self.last_completed {
            Some(last) if last == completed_bytes => {
                self.unchanged += 1;
                if self.unchanged >= self.max_unchanged {
                    Progress::Stalled {
                        samples: self.unchanged,
                    }
                } else {
                    Progress::Unchanged {
                        samples: self.unchanged,
                    }
                }
            }
            _ => {
                self.last_completed = Some(completed_bytes);
                self.unchanged = 0;
                Progress::Advanced
            }
        }
    }

    pub fn unchanged_samples(&self) -> u32 {
        self.unchanged
    }
}
