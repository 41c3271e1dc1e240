//! Interval-driven progress polling with stall detection.

use std::time::Duration;

use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::policy::{retry, with_timeout, BackoffPolicy, Progress, StallConfig, StallDetector};

use super::{TransferError, TransferHandle, TransferPhase, TransferStatus, Transporter};

/// Outcome of one monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorStep {
    /// Still running.
    Progress {
        status: TransferStatus,
        /// Samples taken so far, starting at 1.
        sample: u64,
    },
    /// Transfer finished.
    Finished(TransferStatus),
}

/// Polls one transfer until it completes, fails, stalls, or is cancelled.
pub struct TransferMonitor<'a> {
    transporter: &'a dyn Transporter,
    handle: TransferHandle,
    detector: StallDetector,
    interval: Interval,
    policy: &'a BackoffPolicy,
    call_timeout: Duration,
    cancel: CancellationToken,
    samples: u64,
}

impl<'a> TransferMonitor<'a> {
    pub fn new(
        transporter: &'a dyn Transporter,
        handle: TransferHandle,
        stall: &StallConfig,
        policy: &'a BackoffPolicy,
        call_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut interval = time::interval(stall.sample_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            transporter,
            handle,
            detector: StallDetector::new(stall.max_unchanged_samples),
            interval,
            policy,
            call_timeout,
            cancel,
            samples: 0,
        }
    }

    pub fn handle(&self) -> &TransferHandle {
        &self.handle
    }

    /// Wait for the next sample and classify it.
    pub async fn poll(&mut self) -> Result<MonitorStep, TransferError> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = self.interval.tick() => {}
        }

        let transporter = self.transporter;
        let handle = &self.handle;
        let call_timeout = self.call_timeout;
        let status = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = retry(self.policy, "transporter.status", |_| {
                with_timeout(call_timeout, transporter.status(handle), || TransferError::Timeout)
            }) => result?,
        };
        self.samples += 1;

        match status.phase {
            TransferPhase::Complete => return Ok(MonitorStep::Finished(status)),
            TransferPhase::Error | TransferPhase::Removed => {
                return Err(TransferError::Failed(status.error_message.clone().unwrap_or_else(
                    || format!("transfer {} ended as {}", self.handle, status.phase.as_str()),
                )));
            }
            TransferPhase::Stalled => {
                return Err(TransferError::Stalled {
                    samples: self.detector.unchanged_samples(),
                    completed_bytes: status.completed_bytes,
                });
            }
            TransferPhase::Active | TransferPhase::Waiting | TransferPhase::Paused => {}
        }

        match self.detector.observe(status.completed_bytes) {
            Progress::Stalled { samples } => Err(TransferError::Stalled {
                samples,
                completed_bytes: status.completed_bytes,
            }),
            Progress::Unchanged { samples } => {
                debug!(
                    "Transfer {} unchanged at {} bytes for {} samples",
                    self.handle, status.completed_bytes, samples
                );
                Ok(MonitorStep::Progress {
                    status,
                    sample: self.samples,
                })
            }
            Progress::Advanced => Ok(MonitorStep::Progress {
                status,
                sample: self.samples,
            }),
        }
    }

    /// Poll until the transfer finishes, discarding intermediate progress.
    pub async fn wait(&mut self) -> Result<TransferStatus, TransferError> {
        loop {
            if let MonitorStep::Finished(status) = self.poll().await? {
                return Ok(status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransporter;
    use std::path::Path;

    fn fast_stall(max_unchanged: u32) -> StallConfig {
        StallConfig {
            sample_interval_ms: 1,
            max_unchanged_samples: max_unchanged,
            persist_every_samples: 1,
        }
    }

    #[tokio::test]
    async fn test_monitor_reports_progress_then_finishes() {
        let transporter = MockTransporter::new();
        transporter.script("https://cdn.example/a.mp4", vec![10, 20, 30], 30);
        let handle = transporter
            .start("https://cdn.example/a.mp4", Path::new("/tmp"))
            .await
            .unwrap();

        let policy = BackoffPolicy::no_retry();
        let stall = fast_stall(5);
        let mut monitor = TransferMonitor::new(
            &transporter,
            handle,
            &stall,
            &policy,
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        let mut progress = 0;
        let finished = loop {
            match monitor.poll().await.unwrap() {
                MonitorStep::Progress { .. } => progress += 1,
                MonitorStep::Finished(status) => break status,
            }
        };
        assert_eq!(progress, 3);
        assert_eq!(finished.completed_bytes, 30);
        assert!(finished.local_path.is_some());
    }

    #[tokio::test]
    async fn test_monitor_detects_stall() {
        let transporter = MockTransporter::new();
        transporter.script_stall("https://cdn.example/s.mp4", 512);
        let handle = transporter
            .start("https://cdn.example/s.mp4", Path::new("/tmp"))
            .await
            .unwrap();

        let policy = BackoffPolicy::no_retry();
        let stall = fast_stall(3);
        let mut monitor = TransferMonitor::new(
            &transporter,
            handle,
            &stall,
            &policy,
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        match monitor.wait().await {
            Err(TransferError::Stalled {
                samples,
                completed_bytes,
            }) => {
                assert_eq!(samples, 3);
                assert_eq!(completed_bytes, 512);
            }
            other => panic!("expected stall, got {:?}", other),
        }
        assert_eq!(transporter.status_calls(), 4);
    }

    #[tokio::test]
    async fn test_monitor_cancellation() {
        let transporter = MockTransporter::new();
        transporter.script_stall("https://cdn.example/c.mp4", 0);
        let handle = transporter
            .start("https://cdn.example/c.mp4", Path::new("/tmp"))
            .await
            .unwrap();

        let policy = BackoffPolicy::no_retry();
        let stall = fast_stall(1000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut monitor = TransferMonitor::new(
            &transporter,
            handle,
            &stall,
            &policy,
            Duration::from_secs(1),
            cancel,
        );
        assert!(matches!(monitor.wait().await, Err(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn test_monitor_reports_daemon_failure() {
        let transporter = MockTransporter::new();
        transporter.script_failure("https://cdn.example/f.mp4", "disk full");
        let handle = transporter
            .start("https://cdn.example/f.mp4", Path::new("/tmp"))
            .await
            .unwrap();

        let policy = BackoffPolicy::no_retry();
        let stall = fast_stall(5);
        let mut monitor = TransferMonitor::new(
            &transporter,
            handle,
            &stall,
            &policy,
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        match monitor.wait().await {
            Err(TransferError::Failed(message)) => assert_eq!(message, "disk full"),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
