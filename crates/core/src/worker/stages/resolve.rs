//! Resolve stage: turn every source link into a direct URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::item::Item;
use crate::metrics;
use crate::policy::{retry, with_timeout};
use crate::resolver::{ResolveError, Resolver};
use crate::worker::runner::{StageContext, StageProcessor};
use crate::worker::types::{WorkerError, WorkerRole};

pub struct ResolveStage {
    resolver: Arc<dyn Resolver>,
    call_timeout: Duration,
}

impl ResolveStage {
    pub fn new(resolver: Arc<dyn Resolver>, call_timeout: Duration) -> Self {
        Self {
            resolver,
            call_timeout,
        }
    }
}

#[async_trait]
impl StageProcessor for ResolveStage {
    fn role(&self) -> WorkerRole {
        WorkerRole::Resolve
    }

    async fn process(&self, item: Item, ctx: &StageContext) -> Result<Item, WorkerError> {
        let variants = item.unresolved_variants();
        debug!(
            "[resolve:{}] Item {} has {} variant(s) to resolve via {}",
            ctx.worker_id,
            item.id,
            variants.len(),
            self.resolver.name()
        );

        let mut current = item;
        for (variant, source) in variants {
            let resolver = self.resolver.as_ref();
            let result = retry(&ctx.retry, "resolver.resolve", |_| {
                with_timeout(self.call_timeout, resolver.resolve(&source), || {
                    ResolveError::Timeout
                })
            })
            .await;

            let patch = match result {
                Ok(url) => {
                    info!(
                        "[resolve:{}] Item {} variant {} resolved",
                        ctx.worker_id, current.id, variant
                    );
                    metrics::VARIANT_RESULTS
                        .with_label_values(&["resolve", "success"])
                        .inc();
                    ctx.patch().direct_url(variant, url)
                }
                Err(e) => {
                    warn!(
                        "[resolve:{}] Item {} variant {} failed: {}",
                        ctx.worker_id, current.id, variant, e
                    );
                    metrics::VARIANT_RESULTS
                        .with_label_values(&["resolve", "failure"])
                        .inc();
                    ctx.patch().resolve_failure(variant, e.to_string())
                }
            };
            current = ctx.write(&current.id, patch).await?;
        }

        Ok(current)
    }
}
