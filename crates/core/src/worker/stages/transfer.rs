//! Transfer stage: fetch every resolved variant through the transporter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::item::{Item, ItemError, TransferRecord, VariantKey};
use crate::metrics;
use crate::policy::{retry, with_timeout, StallConfig};
use crate::transporter::{
    output_filename, MonitorStep, TransferError, TransferHandle, TransferMonitor, Transporter,
};
use crate::worker::runner::{StageContext, StageProcessor};
use crate::worker::types::{WorkerError, WorkerRole};

pub struct TransferStage {
    transporter: Arc<dyn Transporter>,
    download_dir: PathBuf,
    call_timeout: Duration,
    stall: StallConfig,
}

impl TransferStage {
    pub fn new(
        transporter: Arc<dyn Transporter>,
        download_dir: impl Into<PathBuf>,
        call_timeout: Duration,
        stall: StallConfig,
    ) -> Self {
        Self {
            transporter,
            download_dir: download_dir.into(),
            call_timeout,
            stall,
        }
    }

    async fn cancel_quietly(&self, handle: &TransferHandle) {
        let result = with_timeout(self.call_timeout, self.transporter.cancel(handle), || {
            TransferError::Timeout
        })
        .await;
        match result {
            Ok(()) | Err(TransferError::NotFound(_)) => {}
            Err(e) => warn!("Could not cancel transfer {}: {}", handle, e),
        }
    }

    /// Run one variant to a terminal record. Only store errors and aborts
    /// escape as `Err`.
    async fn transfer_variant(
        &self,
        item_id: &str,
        variant: &VariantKey,
        url: &str,
        ctx: &StageContext,
    ) -> Result<TransferRecord, WorkerError> {
        let transporter = self.transporter.as_ref();
        let download_dir = self.download_dir.as_path();
        let started = retry(&ctx.retry, "transporter.start", |_| {
            with_timeout(self.call_timeout, transporter.start(url, download_dir), || {
                TransferError::Timeout
            })
        })
        .await;
        let handle = match started {
            Ok(handle) => handle,
            Err(e) => return Ok(TransferRecord::failed(e.to_string(), 0, Utc::now())),
        };
        debug!(
            "[transfer:{}] Item {} variant {} started as {}",
            ctx.worker_id, item_id, variant, handle
        );

        let persist_every = u64::from(self.stall.persist_every_samples.max(1));
        let mut monitor = TransferMonitor::new(
            transporter,
            handle.clone(),
            &self.stall,
            &ctx.retry,
            self.call_timeout,
            ctx.abort.clone(),
        );
        let mut last_bytes = 0;

        let outcome = loop {
            match monitor.poll().await {
                Ok(MonitorStep::Progress { status, sample }) => {
                    last_bytes = status.completed_bytes;
                    if sample % persist_every != 0 {
                        continue;
                    }
                    let record = TransferRecord::progress(
                        status.completed_bytes,
                        status.total_bytes,
                        Utc::now(),
                    );
                    match ctx
                        .write(item_id, ctx.patch().transfer(variant.clone(), record))
                        .await
                    {
                        Ok(_) => {}
                        Err(e @ WorkerError::Store(ItemError::ClaimLost { .. })) => {
                            self.cancel_quietly(&handle).await;
                            return Err(e);
                        }
                        Err(e) => warn!(
                            "[transfer:{}] Could not persist progress of item {}: {}",
                            ctx.worker_id, item_id, e
                        ),
                    }
                }
                Ok(MonitorStep::Finished(status)) => break Ok(status),
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(status) => {
                let local_path = status.local_path.clone().unwrap_or_else(|| {
                    self.download_dir
                        .join(output_filename(url).unwrap_or_else(|| handle.to_string()))
                });
                let bytes = status.completed_bytes.max(status.total_bytes);
                metrics::BYTES_TRANSFERRED.inc_by(bytes);
                Ok(TransferRecord::completed(
                    local_path.to_string_lossy(),
                    bytes,
                    Utc::now(),
                ))
            }
            Err(TransferError::Cancelled) => {
                self.cancel_quietly(&handle).await;
                ctx.write(
                    item_id,
                    ctx.patch()
                        .transfer(variant.clone(), TransferRecord::interrupted(last_bytes, Utc::now())),
                )
                .await?;
                Err(WorkerError::Aborted)
            }
            Err(e) => {
                if matches!(e, TransferError::Stalled { .. }) {
                    metrics::STALL_DETECTIONS.inc();
                }
                self.cancel_quietly(&handle).await;
                Ok(TransferRecord::failed(e.to_string(), last_bytes, Utc::now()))
            }
        }
    }
}

#[async_trait]
impl StageProcessor for TransferStage {
    fn role(&self) -> WorkerRole {
        WorkerRole::Transfer
    }

    async fn process(&self, item: Item, ctx: &StageContext) -> Result<Item, WorkerError> {
        let variants = item.transferable_variants();
        debug!(
            "[transfer:{}] Item {} has {} variant(s) to transfer via {}",
            ctx.worker_id,
            item.id,
            variants.len(),
            self.transporter.name()
        );

        let mut current = item;
        for (variant, url) in variants {
            if ctx.abort.is_cancelled() {
                return Err(WorkerError::Aborted);
            }

            current = ctx
                .write(
                    &current.id,
                    ctx.patch()
                        .transfer(variant.clone(), TransferRecord::processing(Utc::now())),
                )
                .await?;

            let record = self
                .transfer_variant(&current.id, &variant, &url, ctx)
                .await?;
            if record.is_completed() {
                info!(
                    "[transfer:{}] Item {} variant {} transferred ({} bytes)",
                    ctx.worker_id, current.id, variant, record.completed_bytes
                );
                metrics::VARIANT_RESULTS
                    .with_label_values(&["transfer", "success"])
                    .inc();
            } else {
                warn!(
                    "[transfer:{}] Item {} variant {} failed: {}",
                    ctx.worker_id,
                    current.id,
                    variant,
                    record.error.as_deref().unwrap_or("unknown error")
                );
                metrics::VARIANT_RESULTS
                    .with_label_values(&["transfer", "failure"])
                    .inc();
            }
            current = ctx
                .write(&current.id, ctx.patch().transfer(variant, record))
                .await?;
        }

        Ok(current)
    }
}
