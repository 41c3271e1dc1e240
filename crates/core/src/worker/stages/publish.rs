//! Publish stage: upload every transferred variant and clean up after it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::item::{Item, PublishRecord};
use crate::metrics;
use crate::policy::{retry, with_timeout, BackoffPolicy};
use crate::publisher::{format_caption, PublishError, Publisher};
use crate::worker::runner::{StageContext, StageProcessor};
use crate::worker::types::{WorkerError, WorkerRole};

pub struct PublishStage {
    publisher: Arc<dyn Publisher>,
    call_timeout: Duration,
    delete_after_publish: bool,
    cleanup: BackoffPolicy,
}

impl PublishStage {
    pub fn new(publisher: Arc<dyn Publisher>, call_timeout: Duration, delete_after_publish: bool) -> Self {
        Self {
            publisher,
            call_timeout,
            delete_after_publish,
            cleanup: BackoffPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1600)),
        }
    }

    /// Remove a published file. A file that is already gone counts as removed.
    async fn remove_local_file(&self, path: &Path) {
        let result = retry(&self.cleanup, "publish.cleanup", |_| tokio::fs::remove_file(path)).await;
        match result {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {} after publishing: {}", path.display(), e),
        }
    }
}

#[async_trait]
impl StageProcessor for PublishStage {
    fn role(&self) -> WorkerRole {
        WorkerRole::Publish
    }

    async fn process(&self, item: Item, ctx: &StageContext) -> Result<Item, WorkerError> {
        let variants = item.publishable_variants();
        debug!(
            "[publish:{}] Item {} has {} variant(s) to publish via {}",
            ctx.worker_id,
            item.id,
            variants.len(),
            self.publisher.name()
        );

        let mut current = item;
        for (variant, local_path) in variants {
            current = ctx
                .write(
                    &current.id,
                    ctx.patch()
                        .publication(variant.clone(), PublishRecord::processing(Utc::now())),
                )
                .await?;

            let path = PathBuf::from(&local_path);
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| local_path.clone());
            let caption = format_caption(&current.metadata, &file_name, &variant);

            let publisher = self.publisher.as_ref();
            let result = retry(&ctx.retry, "publisher.publish", |_| {
                with_timeout(self.call_timeout, publisher.publish(&path, &caption), || {
                    PublishError::Timeout
                })
            })
            .await;

            let record = match result {
                Ok(published) => {
                    info!(
                        "[publish:{}] Item {} variant {} published as {}",
                        ctx.worker_id, current.id, variant, published.reference
                    );
                    metrics::VARIANT_RESULTS
                        .with_label_values(&["publish", "success"])
                        .inc();
                    PublishRecord::published(published.reference, Utc::now())
                }
                Err(e) => {
                    warn!(
                        "[publish:{}] Item {} variant {} failed: {}",
                        ctx.worker_id, current.id, variant, e
                    );
                    metrics::VARIANT_RESULTS
                        .with_label_values(&["publish", "failure"])
                        .inc();
                    PublishRecord::failed(e.to_string(), Utc::now())
                }
            };

            let published = record.is_published();
            current = ctx
                .write(&current.id, ctx.patch().publication(variant, record))
                .await?;

            if published && self.delete_after_publish {
                self.remove_local_file(&path).await;
            }
        }

        Ok(current)
    }
}
