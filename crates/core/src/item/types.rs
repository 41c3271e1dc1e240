//! Core item data types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{Stage, StageVerdict, VariantState};

// ============================================================================
// Variant Types
// ============================================================================

/// Key identifying one variant of an item (e.g. a quality level like "1080p").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantKey(String);

impl VariantKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VariantKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A variant whose resolution failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveFailure {
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Transfer progress of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub state: VariantState,
    /// Local file path, set once the transfer completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default)]
    pub completed_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn processing(now: DateTime<Utc>) -> Self {
        Self {
            state: VariantState::Processing,
            local_path: None,
            completed_bytes: 0,
            total_bytes: 0,
            error: None,
            updated_at: now,
        }
    }

    pub fn progress(completed_bytes: u64, total_bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            completed_bytes,
            total_bytes,
            ..Self::processing(now)
        }
    }

    pub fn completed(local_path: impl Into<String>, bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            state: VariantState::Completed,
            local_path: Some(local_path.into()),
            completed_bytes: bytes,
            total_bytes: bytes,
            error: None,
            updated_at: now,
        }
    }

    pub fn failed(error: impl Into<String>, completed_bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            state: VariantState::Error,
            local_path: None,
            completed_bytes,
            total_bytes: 0,
            error: Some(error.into()),
            updated_at: now,
        }
    }

    /// Back to pending after an interrupted transfer.
    pub fn interrupted(completed_bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            state: VariantState::Pending,
            completed_bytes,
            ..Self::processing(now)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == VariantState::Completed
    }
}

/// Publication status of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub state: VariantState,
    /// Permanent reference returned by the publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PublishRecord {
    pub fn processing(now: DateTime<Utc>) -> Self {
        Self {
            state: VariantState::Processing,
            reference: None,
            error: None,
            updated_at: now,
        }
    }

    pub fn published(reference: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            state: VariantState::Completed,
            reference: Some(reference.into()),
            error: None,
            updated_at: now,
        }
    }

    pub fn failed(error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            state: VariantState::Error,
            reference: None,
            error: Some(error.into()),
            updated_at: now,
        }
    }

    pub fn is_published(&self) -> bool {
        self.state == VariantState::Completed && self.reference.is_some()
    }
}

// ============================================================================
// Item
// ============================================================================

/// Descriptive fields used for the publish caption.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_language: Option<String>,
    /// Runtime in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
}

/// A media item moving through the pipeline.
///
/// Every per-stage map is keyed by variant so that siblings progress and fail
/// independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub created_at: DateTime<Utc>,

    /// Source links per variant. Never changed after creation.
    pub source_links: BTreeMap<VariantKey, String>,
    #[serde(default)]
    pub direct_urls: BTreeMap<VariantKey, String>,
    #[serde(default)]
    pub resolve_errors: BTreeMap<VariantKey, ResolveFailure>,
    #[serde(default)]
    pub transfers: BTreeMap<VariantKey, TransferRecord>,
    #[serde(default)]
    pub publications: BTreeMap<VariantKey, PublishRecord>,

    pub stage: Stage,

    #[serde(default)]
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    /// In-progress stage of the last failure; routes the cooled-down retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    /// Self-healing restarts so far. Survives the reset itself.
    #[serde(default)]
    pub reset_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl Item {
    /// Create a pending item.
    pub fn new(
        id: impl Into<String>,
        source_links: BTreeMap<VariantKey, String>,
        metadata: ItemMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            source_links,
            direct_urls: BTreeMap::new(),
            resolve_errors: BTreeMap::new(),
            transfers: BTreeMap::new(),
            publications: BTreeMap::new(),
            stage: Stage::Pending,
            error_count: 0,
            last_error: None,
            last_error_at: None,
            failed_stage: None,
            reset_count: 0,
            claimed_by: None,
            started_at: None,
            completed_at: None,
            last_updated: now,
            metadata,
        }
    }

    fn is_published(&self, variant: &VariantKey) -> bool {
        self.publications
            .get(variant)
            .is_some_and(PublishRecord::is_published)
    }

    fn transfer_completed(&self, variant: &VariantKey) -> bool {
        self.transfers
            .get(variant)
            .is_some_and(TransferRecord::is_completed)
    }

    /// Variants with a source link but no direct URL, skipping ones already published.
    pub fn unresolved_variants(&self) -> Vec<(VariantKey, String)> {
        self.source_links
            .iter()
            .filter(|(variant, _)| {
                !self.direct_urls.contains_key(*variant) && !self.is_published(variant)
            })
            .map(|(variant, url)| (variant.clone(), url.clone()))
            .collect()
    }

    /// Variants with a direct URL whose transfer has not completed yet.
    pub fn transferable_variants(&self) -> Vec<(VariantKey, String)> {
        self.direct_urls
            .iter()
            .filter(|(variant, _)| {
                !self.transfer_completed(variant) && !self.is_published(variant)
            })
            .map(|(variant, url)| (variant.clone(), url.clone()))
            .collect()
    }

    /// Variants with a local file that have not been published yet.
    pub fn publishable_variants(&self) -> Vec<(VariantKey, String)> {
        self.transfers
            .iter()
            .filter(|(variant, record)| record.is_completed() && !self.is_published(variant))
            .filter_map(|(variant, record)| {
                record
                    .local_path
                    .as_ref()
                    .map(|path| (variant.clone(), path.clone()))
            })
            .collect()
    }

    /// Any resolved variant is enough to move on.
    pub fn resolve_verdict(&self) -> StageVerdict {
        if !self.direct_urls.is_empty() {
            return StageVerdict::Advance;
        }
        StageVerdict::Fail(summarize_failures(
            "resolution",
            self.resolve_errors.iter().map(|(k, f)| (k, f.error.as_str())),
        ))
    }

    /// Any completed transfer is enough to move on.
    pub fn transfer_verdict(&self) -> StageVerdict {
        if self.transfers.values().any(TransferRecord::is_completed) {
            return StageVerdict::Advance;
        }
        StageVerdict::Fail(summarize_failures(
            "transfer",
            self.transfers
                .iter()
                .filter_map(|(k, r)| r.error.as_deref().map(|e| (k, e))),
        ))
    }

    /// Every completed transfer must have a publication reference.
    pub fn publish_verdict(&self) -> StageVerdict {
        let missing: Vec<&VariantKey> = self
            .transfers
            .iter()
            .filter(|(variant, record)| record.is_completed() && !self.is_published(variant))
            .map(|(variant, _)| variant)
            .collect();

        if missing.is_empty() && !self.publications.is_empty() {
            return StageVerdict::Advance;
        }
        if missing.is_empty() {
            return StageVerdict::Fail("publish: no transferred variants".to_string());
        }

        let failures: Vec<(&VariantKey, &str)> = missing
            .iter()
            .map(|variant| {
                let error = self
                    .publications
                    .get(*variant)
                    .and_then(|r| r.error.as_deref())
                    .unwrap_or("not published");
                (*variant, error)
            })
            .collect();
        StageVerdict::Fail(summarize_failures("publish", failures.into_iter()))
    }

    /// Verdict for the pass run by the worker of `stage`.
    pub fn verdict_for(&self, stage: Stage) -> Option<StageVerdict> {
        match stage {
            Stage::Resolving => Some(self.resolve_verdict()),
            Stage::Transferring => Some(self.transfer_verdict()),
            Stage::Publishing => Some(self.publish_verdict()),
            _ => None,
        }
    }

    /// Published references keyed by variant.
    pub fn references(&self) -> BTreeMap<VariantKey, String> {
        self.publications
            .iter()
            .filter_map(|(variant, record)| {
                record
                    .reference
                    .as_ref()
                    .filter(|_| record.is_published())
                    .map(|r| (variant.clone(), r.clone()))
            })
            .collect()
    }
}

fn summarize_failures<'a>(
    what: &str,
    failures: impl Iterator<Item = (&'a VariantKey, &'a str)>,
) -> String {
    let parts: Vec<String> = failures
        .map(|(variant, error)| format!("{}: {}", variant, error))
        .collect();
    if parts.is_empty() {
        format!("{}: no variants succeeded", what)
    } else {
        format!("{} failed for all variants ({})", what, parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with(variants: &[&str]) -> Item {
        let links = variants
            .iter()
            .map(|v| (VariantKey::from(*v), format!("https://source.example/{}", v)))
            .collect();
        Item::new("item-1", links, ItemMetadata::default(), Utc::now())
    }

    #[test]
    fn test_new_item_is_pending_and_empty() {
        let item = item_with(&["720p", "1080p"]);
        assert_eq!(item.stage, Stage::Pending);
        assert_eq!(item.error_count, 0);
        assert!(item.direct_urls.is_empty());
        assert_eq!(item.unresolved_variants().len(), 2);
    }

    #[test]
    fn test_unresolved_skips_resolved_and_published() {
        let mut item = item_with(&["480p", "720p", "1080p"]);
        let now = Utc::now();
        item.direct_urls
            .insert("480p".into(), "https://cdn.example/480".to_string());
        item.publications
            .insert("720p".into(), PublishRecord::published("https://t.me/c/1", now));

        let unresolved = item.unresolved_variants();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].0, VariantKey::from("1080p"));
    }

    #[test]
    fn test_transferable_and_publishable() {
        let mut item = item_with(&["720p", "1080p"]);
        let now = Utc::now();
        item.direct_urls
            .insert("720p".into(), "https://cdn.example/720".to_string());
        item.direct_urls
            .insert("1080p".into(), "https://cdn.example/1080".to_string());
        item.transfers
            .insert("720p".into(), TransferRecord::completed("/data/a.mp4", 10, now));

        let transferable = item.transferable_variants();
        assert_eq!(transferable, vec![(VariantKey::from("1080p"), "https://cdn.example/1080".to_string())]);

        let publishable = item.publishable_variants();
        assert_eq!(publishable, vec![(VariantKey::from("720p"), "/data/a.mp4".to_string())]);
    }

    #[test]
    fn test_resolve_verdict() {
        let mut item = item_with(&["720p"]);
        item.resolve_errors.insert(
            "720p".into(),
            ResolveFailure {
                error: "page has no link".to_string(),
                failed_at: Utc::now(),
            },
        );
        match item.resolve_verdict() {
            StageVerdict::Fail(reason) => assert!(reason.contains("page has no link")),
            other => panic!("expected failure, got {:?}", other),
        }

        item.direct_urls
            .insert("720p".into(), "https://cdn.example/720".to_string());
        assert!(item.resolve_verdict().is_advance());
    }

    #[test]
    fn test_publish_verdict_requires_every_transferred_variant() {
        let mut item = item_with(&["720p", "1080p"]);
        let now = Utc::now();
        item.transfers
            .insert("720p".into(), TransferRecord::completed("/a", 1, now));
        item.transfers
            .insert("1080p".into(), TransferRecord::completed("/b", 1, now));
        item.publications
            .insert("720p".into(), PublishRecord::published("ref-a", now));
        item.publications
            .insert("1080p".into(), PublishRecord::failed("file too large", now));

        match item.publish_verdict() {
            StageVerdict::Fail(reason) => assert!(reason.contains("1080p: file too large")),
            other => panic!("expected failure, got {:?}", other),
        }

        item.publications
            .insert("1080p".into(), PublishRecord::published("ref-b", now));
        assert!(item.publish_verdict().is_advance());
        assert_eq!(item.references().len(), 2);
    }

    #[test]
    fn test_failed_transfer_does_not_block_publish_verdict() {
        let mut item = item_with(&["720p", "1080p"]);
        let now = Utc::now();
        item.transfers
            .insert("720p".into(), TransferRecord::completed("/a", 1, now));
        item.transfers
            .insert("1080p".into(), TransferRecord::failed("stalled", 5, now));
        item.publications
            .insert("720p".into(), PublishRecord::published("ref-a", now));

        assert!(item.transfer_verdict().is_advance());
        assert!(item.publish_verdict().is_advance());
    }

    #[test]
    fn test_item_json_uses_variant_keys() {
        let mut item = item_with(&["1080p"]);
        item.direct_urls
            .insert("1080p".into(), "https://cdn.example/x".to_string());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["stage"], "pending");
        assert_eq!(json["direct_urls"]["1080p"], "https://cdn.example/x");

        let back: Item = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
