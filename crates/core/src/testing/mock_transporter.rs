//! Mock transporter for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::transporter::{
    output_filename, TransferError, TransferHandle, TransferPhase, TransferStatus, Transporter,
};

/// How a scripted transfer behaves on successive status calls.
#[derive(Debug, Clone)]
enum Script {
    /// Report each byte count as active, then complete at `total`.
    Steps { steps: Vec<u64>, total: u64 },
    /// Active forever at the same byte count.
    Stall { bytes: u64 },
    /// Daemon-side failure on the first status call.
    Failure { message: String },
}

#[derive(Debug)]
struct ActiveTransfer {
    url: String,
    dest_dir: PathBuf,
    script: Script,
    position: usize,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, Script>,
    start_failures: HashMap<String, String>,
    transfers: HashMap<String, ActiveTransfer>,
    started: Vec<String>,
    cancelled: Vec<TransferHandle>,
}

/// Mock implementation of the Transporter trait.
///
/// Unscripted URLs complete on the first status call with 1024 bytes. Finished
/// transfers report a local path inside the destination directory.
///
/// # Example
///
/// ```rust,ignore
/// let transporter = MockTransporter::new();
/// transporter.script("https://cdn.example/a.mp4", vec![10, 20], 20);
///
/// let handle = transporter.start("https://cdn.example/a.mp4", Path::new("/tmp")).await?;
/// // status: active 10, active 20, complete 20
/// ```
#[derive(Debug, Default)]
pub struct MockTransporter {
    state: Mutex<State>,
    handle_counter: AtomicU32,
    status_calls: AtomicUsize,
}

impl MockTransporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Progress through `steps`, then complete at `total` bytes.
    pub fn script(&self, url: &str, steps: Vec<u64>, total: u64) {
        self.state()
            .scripts
            .insert(url.to_string(), Script::Steps { steps, total });
    }

    /// Never progress past `bytes`.
    pub fn script_stall(&self, url: &str, bytes: u64) {
        self.state()
            .scripts
            .insert(url.to_string(), Script::Stall { bytes });
    }

    /// Fail on the daemon side with `message`.
    pub fn script_failure(&self, url: &str, message: &str) {
        self.state().scripts.insert(
            url.to_string(),
            Script::Failure {
                message: message.to_string(),
            },
        );
    }

    /// Refuse to start `url`.
    pub fn fail_start(&self, url: &str, message: &str) {
        self.state()
            .start_failures
            .insert(url.to_string(), message.to_string());
    }

    /// URLs passed to `start`, in order.
    pub fn started(&self) -> Vec<String> {
        self.state().started.clone()
    }

    pub fn cancelled(&self) -> Vec<TransferHandle> {
        self.state().cancelled.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transporter for MockTransporter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, url: &str, dest_dir: &Path) -> Result<TransferHandle, TransferError> {
        let mut state = self.state();
        state.started.push(url.to_string());
        if let Some(message) = state.start_failures.get(url) {
            return Err(TransferError::Failed(message.clone()));
        }

        let script = state.scripts.get(url).cloned().unwrap_or(Script::Steps {
            steps: Vec::new(),
            total: 1024,
        });
        let id = self.handle_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = TransferHandle(format!("mock-{:04}", id));
        state.transfers.insert(
            handle.0.clone(),
            ActiveTransfer {
                url: url.to_string(),
                dest_dir: dest_dir.to_path_buf(),
                script,
                position: 0,
            },
        );
        Ok(handle)
    }

    async fn status(&self, handle: &TransferHandle) -> Result<TransferStatus, TransferError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        let transfer = state
            .transfers
            .get_mut(&handle.0)
            .ok_or_else(|| TransferError::NotFound(handle.0.clone()))?;

        let active = |bytes: u64, total: u64| TransferStatus {
            phase: TransferPhase::Active,
            completed_bytes: bytes,
            total_bytes: total,
            speed: 0,
            local_path: None,
            error_message: None,
        };

        let status = match &transfer.script {
            Script::Steps { steps, total } => match steps.get(transfer.position) {
                Some(bytes) => active(*bytes, *total),
                None => {
                    let name = output_filename(&transfer.url)
                        .unwrap_or_else(|| format!("{}.bin", handle.0));
                    TransferStatus {
                        phase: TransferPhase::Complete,
                        completed_bytes: *total,
                        total_bytes: *total,
                        speed: 0,
                        local_path: Some(transfer.dest_dir.join(name)),
                        error_message: None,
                    }
                }
            },
            Script::Stall { bytes } => active(*bytes, bytes.saturating_mul(2)),
            Script::Failure { message } => TransferStatus {
                phase: TransferPhase::Error,
                error_message: Some(message.clone()),
                ..active(0, 0)
            },
        };
        transfer.position += 1;
        Ok(status)
    }

    async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let mut state = self.state();
        if state.transfers.remove(&handle.0).is_none() {
            return Err(TransferError::NotFound(handle.0.clone()));
        }
        state.cancelled.push(handle.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_transfer_completes() {
        let transporter = MockTransporter::new();
        let handle = transporter
            .start("https://cdn.example/movie.mkv", Path::new("/data"))
            .await
            .unwrap();
        let status = transporter.status(&handle).await.unwrap();
        assert_eq!(status.phase, TransferPhase::Complete);
        assert_eq!(
            status.local_path,
            Some(PathBuf::from("/data/movie.mkv"))
        );
    }

    #[tokio::test]
    async fn test_cancel_forgets_transfer() {
        let transporter = MockTransporter::new();
        let handle = transporter
            .start("https://cdn.example/a.mp4", Path::new("/data"))
            .await
            .unwrap();
        transporter.cancel(&handle).await.unwrap();
        assert!(matches!(
            transporter.status(&handle).await,
            Err(TransferError::NotFound(_))
        ));
        assert_eq!(transporter.cancelled(), vec![handle]);
    }
}
