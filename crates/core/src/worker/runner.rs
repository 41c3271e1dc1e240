//! Stage worker loop.
//!
//! A worker repeatedly claims one eligible item, runs its stage over every
//! eligible variant, writes the aggregate stage update and, when the pass
//! fails, hands the item to the self-healing failure handler. Workers share
//! nothing but the store.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::item::{ClaimFilter, Item, ItemError, ItemPatch, StageVerdict, StoreClient};
use crate::metrics;
use crate::policy::{BackoffPolicy, FailureOutcome, HealingConfig, SelfHealingPolicy};

use super::types::{PollOutcome, WorkerError, WorkerRole, WorkerStatus};

/// Everything a stage needs while it holds an item.
#[derive(Clone)]
pub struct StageContext {
    pub worker_id: String,
    pub store: StoreClient,
    pub retry: BackoffPolicy,
    /// Fires on hard abort during shutdown.
    pub abort: CancellationToken,
}

impl StageContext {
    /// Empty patch bound to this worker's claim.
    pub fn patch(&self) -> ItemPatch {
        ItemPatch::owned_by(&self.worker_id)
    }

    /// Persist a patch immediately and return the committed item.
    pub async fn write(&self, item_id: &str, patch: ItemPatch) -> Result<Item, WorkerError> {
        Ok(self.store.update(item_id, patch).await?)
    }
}

/// Per-variant work of one stage.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn role(&self) -> WorkerRole;

    /// Attempt every eligible variant of `item`, persisting each result as it
    /// happens, and return the committed item after the last write.
    async fn process(&self, item: Item, ctx: &StageContext) -> Result<Item, WorkerError>;
}

/// Loop timing and policies for one worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub error_retry_delay: Duration,
    pub retry: BackoffPolicy,
    pub healing: HealingConfig,
    pub scan_limit: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_retry_delay: Duration::from_secs(10),
            retry: BackoffPolicy::default(),
            healing: HealingConfig::default(),
            scan_limit: 50,
        }
    }
}

/// Short random id used in logs and `claimed_by`.
pub fn generate_worker_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// A polling worker for one stage role.
pub struct Worker {
    id: String,
    role: WorkerRole,
    filter: ClaimFilter,
    store: StoreClient,
    processor: Arc<dyn StageProcessor>,
    healing: SelfHealingPolicy,
    settings: WorkerSettings,
    status: Arc<RwLock<WorkerStatus>>,
}

impl Worker {
    pub fn new(
        processor: Arc<dyn StageProcessor>,
        store: StoreClient,
        settings: WorkerSettings,
    ) -> Result<Self, WorkerError> {
        let role = processor.role();
        let filter = ClaimFilter::for_stage(role.ready_stage())
            .ok_or_else(|| WorkerError::Setup(format!("no claim filter for {}", role)))?
            .with_stale_after(settings.healing.stale_after())
            .with_error_cooldown(settings.healing.error_cooldown())
            .with_scan_limit(settings.scan_limit);
        let id = generate_worker_id();

        Ok(Self {
            status: Arc::new(RwLock::new(WorkerStatus::new(role, id.clone()))),
            id,
            role,
            filter,
            store,
            healing: SelfHealingPolicy::new(&settings.healing),
            processor,
            settings,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn status(&self) -> WorkerStatus {
        read_status(&self.status)
    }

    fn update_status(&self, f: impl FnOnce(&mut WorkerStatus)) {
        if let Ok(mut status) = self.status.write() {
            f(&mut status);
        }
    }

    /// Claim and process at most one item.
    pub async fn run_once(&self, abort: &CancellationToken) -> PollOutcome {
        let patch = self.filter.claim_patch(&self.id);
        let claimed = match self.store.claim(&self.filter, &patch).await {
            Ok(Some(item)) => item,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                error!("[{}:{}] Claim failed: {}", self.role, self.id, e);
                return PollOutcome::StoreUnavailable;
            }
        };

        let item_id = claimed.id.clone();
        info!(
            "[{}:{}] Claimed item {} ({})",
            self.role,
            self.id,
            item_id,
            claimed.metadata.title.as_deref().unwrap_or("untitled")
        );
        metrics::ITEMS_CLAIMED
            .with_label_values(&[self.role.as_str()])
            .inc();
        self.update_status(|s| s.active_item = Some(item_id.clone()));

        let ctx = StageContext {
            worker_id: self.id.clone(),
            store: self.store.clone(),
            retry: self.settings.retry.clone(),
            abort: abort.clone(),
        };

        let started = Instant::now();
        let result = self.run_stage(claimed, &ctx).await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(item) => {
                metrics::STAGE_DURATION
                    .with_label_values(&[self.role.as_str(), "success"])
                    .observe(elapsed);
                if item.stage == crate::item::Stage::Completed {
                    metrics::ITEMS_COMPLETED.inc();
                }
                self.update_status(|s| s.processed += 1);
                info!(
                    "[{}:{}] Item {} advanced to {} in {:.1}s",
                    self.role, self.id, item_id, item.stage, elapsed
                );
                PollOutcome::Processed {
                    item_id,
                    stage: item.stage,
                }
            }
            Err(WorkerError::Aborted) => {
                warn!(
                    "[{}:{}] Aborted while holding item {}; left for reclaim",
                    self.role, self.id, item_id
                );
                PollOutcome::Aborted { item_id }
            }
            Err(e) => {
                metrics::STAGE_DURATION
                    .with_label_values(&[self.role.as_str(), "failure"])
                    .observe(elapsed);
                self.update_status(|s| s.failures += 1);
                self.handle_failure(item_id, e).await
            }
        };

        self.update_status(|s| s.active_item = None);
        outcome
    }

    /// Per-variant work followed by the aggregate stage update.
    async fn run_stage(&self, item: Item, ctx: &StageContext) -> Result<Item, WorkerError> {
        let claim_stage = self.role.claim_stage();
        let item = self.processor.process(item, ctx).await?;

        match item.verdict_for(claim_stage) {
            Some(StageVerdict::Advance) => {
                let Some(next) = claim_stage.success_stage() else {
                    return Err(WorkerError::StageFailed(format!(
                        "{} has no successor stage",
                        claim_stage
                    )));
                };
                let mut patch = ctx.patch().stage(next);
                if next == crate::item::Stage::Completed {
                    patch = patch.completed();
                }
                ctx.write(&item.id, patch).await
            }
            Some(StageVerdict::Fail(reason)) => Err(WorkerError::StageFailed(reason)),
            None => Err(WorkerError::StageFailed(format!(
                "no verdict for stage {}",
                claim_stage
            ))),
        }
    }

    async fn handle_failure(&self, item_id: String, error: WorkerError) -> PollOutcome {
        error!(
            "[{}:{}] Item {} failed: {}",
            self.role, self.id, item_id, error
        );
        metrics::ITEM_FAILURES
            .with_label_values(&[self.role.as_str()])
            .inc();

        if let WorkerError::Store(ItemError::ClaimLost { owner, .. }) = &error {
            warn!(
                "[{}:{}] Item {} was taken over by {:?}; not recording failure",
                self.role, self.id, item_id, owner
            );
            return PollOutcome::ClaimLost { item_id };
        }

        let patch = self.healing.failure_patch(&self.id, &error.to_string());
        match self.store.update(&item_id, patch).await {
            Ok(item) => {
                match self.healing.outcome(&item) {
                    FailureOutcome::Reset => {
                        metrics::SELF_HEAL_RESETS.inc();
                        warn!(
                            "[{}:{}] Item {} reached {} failures; reset to pending",
                            self.role,
                            self.id,
                            item_id,
                            self.healing.threshold()
                        );
                    }
                    FailureOutcome::Exhausted => {
                        metrics::SELF_HEAL_EXHAUSTED.inc();
                        error!(
                            "[{}:{}] Item {} failed after {} resets; left in error",
                            self.role,
                            self.id,
                            item_id,
                            self.healing.max_resets()
                        );
                    }
                    FailureOutcome::Errored { error_count } => {
                        info!(
                            "[{}:{}] Item {} parked in error ({}/{})",
                            self.role,
                            self.id,
                            item_id,
                            error_count,
                            self.healing.threshold()
                        );
                    }
                }
                PollOutcome::Failed {
                    item_id,
                    stage: item.stage,
                }
            }
            Err(ItemError::ClaimLost { .. }) => PollOutcome::ClaimLost { item_id },
            Err(e) => {
                error!(
                    "[{}:{}] Failed to record failure for item {}: {}",
                    self.role, self.id, item_id, e
                );
                PollOutcome::StoreUnavailable
            }
        }
    }

    /// Poll until `stop` fires. The active item is always finished first
    /// unless `abort` interrupts it.
    pub async fn run(self, stop: CancellationToken, abort: CancellationToken) {
        info!("[{}:{}] Worker started", self.role, self.id);
        self.update_status(|s| s.running = true);

        while !stop.is_cancelled() {
            let pause = match self.run_once(&abort).await {
                PollOutcome::Idle => Some(self.settings.poll_interval),
                PollOutcome::Processed { .. } => None,
                PollOutcome::Aborted { .. } => break,
                PollOutcome::Failed { .. }
                | PollOutcome::ClaimLost { .. }
                | PollOutcome::StoreUnavailable => Some(self.settings.error_retry_delay),
            };

            if let Some(pause) = pause {
                debug!("[{}:{}] Sleeping {:?}", self.role, self.id, pause);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        self.update_status(|s| {
            s.running = false;
            s.active_item = None;
        });
        info!("[{}:{}] Worker stopped", self.role, self.id);
    }

    /// Run on the tokio runtime and return a handle for supervision.
    pub fn spawn(self) -> WorkerHandle {
        let stop = CancellationToken::new();
        let abort = CancellationToken::new();
        let id = self.id.clone();
        let role = self.role;
        let status = Arc::clone(&self.status);
        let task = tokio::spawn(self.run(stop.clone(), abort.clone()));

        WorkerHandle {
            id,
            role,
            status,
            stop,
            abort,
            task,
        }
    }
}

fn read_status(status: &RwLock<WorkerStatus>) -> WorkerStatus {
    match status.read() {
        Ok(status) => status.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    id: String,
    role: WorkerRole,
    status: Arc<RwLock<WorkerStatus>>,
    stop: CancellationToken,
    abort: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn status(&self) -> WorkerStatus {
        read_status(&self.status)
    }

    /// Shared status cell, for supervisors that outlive the handle.
    pub fn status_cell(&self) -> Arc<RwLock<WorkerStatus>> {
        Arc::clone(&self.status)
    }

    /// Ask the worker to stop after its active item.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Stop gracefully, waiting up to `grace`. Past that, in-flight transfer
    /// monitoring is aborted; after another `grace` the task is dropped.
    pub async fn stop(mut self, grace: Duration) {
        self.stop.cancel();
        if tokio::time::timeout(grace, &mut self.task).await.is_ok() {
            return;
        }

        warn!(
            "[{}:{}] Worker did not stop within {:?}; aborting in-flight work",
            self.role, self.id, grace
        );
        self.abort.cancel();
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            error!("[{}:{}] Worker still busy; dropping task", self.role, self.id);
            self.task.abort();
        }
    }
}
