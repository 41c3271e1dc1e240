//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the collaborator traits and
//! helpers that put items into a given stage, so stages and workers can be
//! exercised without a real resolver, transfer daemon or delivery channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediarelay_core::testing::{resolved_item, MockTransporter};
//!
//! let transporter = MockTransporter::new();
//! transporter.script("https://cdn.example/a.mp4", vec![10, 20], 20);
//!
//! let client = resolved_item(&[("720p", "https://cdn.example/a.mp4")]).await?;
//! ```

mod mock_publisher;
mod mock_resolver;
mod mock_transporter;

pub use mock_publisher::{MockPublisher, RecordedPublish};
pub use mock_resolver::MockResolver;
pub use mock_transporter::MockTransporter;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::item::{
    ClaimFilter, Item, ItemError, ItemPatch, ItemStore, SqliteItemStore, Stage, StoreClient,
    TransferRecord, VariantKey,
};
use crate::policy::BackoffPolicy;
use crate::worker::{StageContext, WorkerRole};

/// Store client over a fresh in-memory database, without retries.
pub fn memory_client() -> Result<StoreClient, ItemError> {
    let store: Arc<dyn ItemStore> = Arc::new(SqliteItemStore::in_memory()?);
    Ok(StoreClient::new(
        store,
        Duration::from_secs(5),
        BackoffPolicy::no_retry(),
    ))
}

/// New pending item with one source link per `(variant, source)` pair.
pub async fn store_with_item(links: &[(&str, &str)]) -> Result<(StoreClient, Item), ItemError> {
    let client = memory_client()?;
    let request = fixtures::create_request(links);
    let item = client.store().create(request)?;
    Ok((client, item))
}

/// Item waiting for transfer, with `(variant, direct_url)` pairs already resolved.
pub async fn resolved_item(urls: &[(&str, &str)]) -> Result<StoreClient, ItemError> {
    let links = source_links_for(urls);
    let (client, item) = store_with_item(&as_pairs(&links)).await?;

    let mut patch = ItemPatch::new().claim(Stage::Resolving, "fixture");
    for (variant, url) in urls {
        patch = patch.direct_url(VariantKey::from(*variant), *url);
    }
    client
        .update(&item.id, patch.stage(Stage::ReadyForTransfer))
        .await?;
    Ok(client)
}

/// Item waiting for publication, with `(variant, local_path)` pairs already transferred.
pub async fn transferred_item(files: &[(&str, &str)]) -> Result<StoreClient, ItemError> {
    let links = source_links_for(files);
    let (client, item) = store_with_item(&as_pairs(&links)).await?;
    let now = Utc::now();

    let mut patch = ItemPatch::new().claim(Stage::Resolving, "fixture");
    for (variant, _) in files {
        patch = patch.direct_url(
            VariantKey::from(*variant),
            format!("https://cdn.example/{}", variant),
        );
    }
    patch = patch
        .stage(Stage::ReadyForTransfer)
        .claim(Stage::Transferring, "fixture");
    for (variant, path) in files {
        let bytes = std::fs::metadata(Path::new(path)).map(|m| m.len()).unwrap_or(0);
        patch = patch.transfer(
            VariantKey::from(*variant),
            TransferRecord::completed(*path, bytes, now),
        );
    }
    client
        .update(&item.id, patch.stage(Stage::ReadyForPublish))
        .await?;
    Ok(client)
}

/// Claim the oldest item eligible for `role` as `worker_id`.
pub async fn claim_for(
    client: &StoreClient,
    role: WorkerRole,
    worker_id: &str,
) -> Result<Item, ItemError> {
    let filter = ClaimFilter::for_stage(role.ready_stage())
        .ok_or_else(|| ItemError::InvalidRequest(format!("no claim filter for {}", role)))?;
    client
        .claim(&filter, &filter.claim_patch(worker_id))
        .await?
        .ok_or_else(|| ItemError::NotFound(format!("no item eligible for {}", role)))
}

/// Stage context for `worker_id` without retries.
pub fn stage_context(client: &StoreClient, worker_id: &str) -> StageContext {
    StageContext {
        worker_id: worker_id.to_string(),
        store: client.clone(),
        retry: BackoffPolicy::no_retry(),
        abort: CancellationToken::new(),
    }
}

fn source_links_for(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(variant, _)| {
            (
                variant.to_string(),
                format!("https://src.example/{}", variant),
            )
        })
        .collect()
}

fn as_pairs(links: &[(String, String)]) -> Vec<(&str, &str)> {
    links
        .iter()
        .map(|(variant, url)| (variant.as_str(), url.as_str()))
        .collect()
}

/// Test fixtures for creating sample data.
pub mod fixtures {
    use crate::item::{CreateItemRequest, ItemMetadata, VariantKey};

    /// Metadata for a film with every caption field present.
    pub fn metadata(title: &str) -> ItemMetadata {
        ItemMetadata {
            title: Some(title.to_string()),
            language: Some("en".to_string()),
            original_language: Some("en".to_string()),
            runtime: Some(112),
            genres: vec!["Drama".to_string(), "Thriller".to_string()],
        }
    }

    /// Create request with one source link per `(variant, source)` pair.
    pub fn create_request(links: &[(&str, &str)]) -> CreateItemRequest {
        CreateItemRequest {
            source_links: links
                .iter()
                .map(|(variant, url)| (VariantKey::from(*variant), url.to_string()))
                .collect(),
            metadata: metadata("Test Film"),
        }
    }
}
