//! SQLite-backed item store implementation.
//!
//! Items are stored as JSON documents next to a few extracted columns used
//! for filtering. Claims run inside `BEGIN IMMEDIATE` transactions, so any
//! number of connections (or processes) can poll the same database file and
//! each item is handed to at most one of them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{
    ClaimFilter, CreateItemRequest, Item, ItemError, ItemFilter, ItemPatch, ItemStore, Stage,
};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed item store.
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    /// Open (or create) the database file and tables.
    pub fn new(path: &Path) -> Result<Self, ItemError> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open the database with a custom lock wait.
    pub fn with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, ItemError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, ItemError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ItemError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                stage TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                failed_stage TEXT,
                last_error_at TEXT,
                document TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_stage_updated ON items(stage, last_updated);
            CREATE INDEX IF NOT EXISTS idx_items_created_at ON items(created_at);
            "#,
        )?;

        // Databases created before the failure columns existed
        for column in ["failed_stage", "last_error_at"] {
            if !Self::has_column(conn, column)? {
                conn.execute_batch(&format!("ALTER TABLE items ADD COLUMN {} TEXT", column))?;
            }
        }
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_items_failed ON items(stage, failed_stage, last_error_at);",
        )?;
        Ok(())
    }

    fn has_column(conn: &Connection, column: &str) -> Result<bool, ItemError> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('items')")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for name in names {
            if name? == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ItemError> {
        self.conn
            .lock()
            .map_err(|_| ItemError::Database("connection lock poisoned".to_string()))
    }

    fn timestamp(at: DateTime<Utc>) -> String {
        // fixed width so text ordering matches time ordering
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn insert(conn: &Connection, item: &Item) -> Result<(), ItemError> {
        let document = serde_json::to_string(item)?;
        conn.execute(
            "INSERT INTO items (id, created_at, stage, last_updated, failed_stage, last_error_at, document)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id,
                Self::timestamp(item.created_at),
                item.stage.as_str(),
                Self::timestamp(item.last_updated),
                item.failed_stage.map(|stage| stage.as_str()),
                item.last_error_at.map(Self::timestamp),
                document,
            ],
        )?;
        Ok(())
    }

    fn write(conn: &Connection, item: &Item) -> Result<(), ItemError> {
        let document = serde_json::to_string(item)?;
        let changed = conn.execute(
            "UPDATE items SET stage = ?, last_updated = ?, failed_stage = ?, last_error_at = ?, document = ?
             WHERE id = ?",
            params![
                item.stage.as_str(),
                Self::timestamp(item.last_updated),
                item.failed_stage.map(|stage| stage.as_str()),
                item.last_error_at.map(Self::timestamp),
                document,
                item.id,
            ],
        )?;
        if changed == 0 {
            return Err(ItemError::NotFound(item.id.clone()));
        }
        Ok(())
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<Item>, ItemError> {
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM items WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        document
            .map(|json| serde_json::from_str(&json).map_err(ItemError::from))
            .transpose()
    }

    /// Oldest items the filter could accept. Stage, staleness and cool-down
    /// are decided in SQL so ineligible rows never crowd out the scan; only
    /// the per-variant requirement is left to `ClaimFilter::matches`.
    fn candidates(
        conn: &Connection,
        filter: &ClaimFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Item>, ItemError> {
        let stale_cutoff = filter.stale_cutoff(now).map(Self::timestamp);
        let error_cutoff = filter.error_cutoff(now).map(Self::timestamp);

        let mut stmt = conn.prepare(
            r#"
            SELECT document FROM items
            WHERE stage = ?1
               OR (stage = ?2 AND ?3 IS NOT NULL AND last_updated <= ?3)
               OR (stage = ?4 AND failed_stage = ?2 AND ?5 IS NOT NULL
                   AND (last_error_at IS NULL OR last_error_at <= ?5))
            ORDER BY last_updated ASC
            LIMIT ?6
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                filter.ready_stage.as_str(),
                filter.claim_stage.as_str(),
                stale_cutoff,
                Stage::Error.as_str(),
                error_cutoff,
                filter.scan_limit as i64,
            ],
            |row| row.get::<_, String>(0),
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(serde_json::from_str(&row?)?);
        }
        Ok(items)
    }
}

impl ItemStore for SqliteItemStore {
    fn create(&self, request: CreateItemRequest) -> Result<Item, ItemError> {
        request.validate()?;
        let conn = self.lock()?;

        let item = Item::new(
            uuid::Uuid::new_v4().to_string(),
            request.source_links,
            request.metadata,
            Utc::now(),
        );
        Self::insert(&conn, &item)?;
        Ok(item)
    }

    fn get(&self, id: &str) -> Result<Option<Item>, ItemError> {
        let conn = self.lock()?;
        Self::load(&conn, id)
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>, ItemError> {
        let conn = self.lock()?;

        let (where_clause, stage) = match filter.stage {
            Some(stage) => ("WHERE stage = ?1", Some(stage.as_str())),
            None => ("", None),
        };
        let sql = format!(
            "SELECT document FROM items {} ORDER BY created_at ASC LIMIT ?{} OFFSET ?{}",
            where_clause,
            if stage.is_some() { 2 } else { 1 },
            if stage.is_some() { 3 } else { 2 },
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(stage) = stage {
            params.push(Box::new(stage));
        }
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
        let mut items = Vec::new();
        for row in rows {
            items.push(serde_json::from_str(&row?)?);
        }
        Ok(items)
    }

    fn count_by_stage(&self) -> Result<BTreeMap<Stage, i64>, ItemError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT stage, COUNT(*) FROM items GROUP BY stage")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (stage, count) = row?;
            let stage: Stage = stage
                .parse()
                .map_err(|e: super::ParseStageError| ItemError::Database(e.to_string()))?;
            counts.insert(stage, count);
        }
        Ok(counts)
    }

    fn claim(&self, filter: &ClaimFilter, patch: &ItemPatch) -> Result<Option<Item>, ItemError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let candidates = Self::candidates(&tx, filter, now)?;
        let Some(mut item) = candidates
            .into_iter()
            .find(|candidate| filter.matches(candidate, now))
        else {
            return Ok(None);
        };

        let previous = item.stage;
        patch.apply(&mut item, now)?;
        Self::write(&tx, &item)?;
        tx.commit()?;

        debug!(
            "Claimed item {} ({} -> {})",
            item.id, previous, item.stage
        );
        Ok(Some(item))
    }

    fn update(&self, id: &str, patch: &ItemPatch) -> Result<Item, ItemError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut item = Self::load(&tx, id)?.ok_or_else(|| ItemError::NotFound(id.to_string()))?;
        patch.apply(&mut item, Utc::now())?;
        Self::write(&tx, &item)?;
        tx.commit()?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemMetadata, TransferRecord, VariantKey};

    fn create_test_store() -> SqliteItemStore {
        SqliteItemStore::in_memory().unwrap()
    }

    fn create_request(variants: &[&str]) -> CreateItemRequest {
        CreateItemRequest {
            source_links: variants
                .iter()
                .map(|v| (VariantKey::from(*v), format!("https://source.example/{}", v)))
                .collect(),
            metadata: ItemMetadata {
                title: Some("Test Movie".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = create_test_store();
        let created = store.create(create_request(&["720p"])).unwrap();
        assert_eq!(created.stage, Stage::Pending);

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_rejects_empty_links() {
        let store = create_test_store();
        let err = store.create(CreateItemRequest::default()).unwrap_err();
        assert!(matches!(err, ItemError::InvalidRequest(_)));
    }

    #[test]
    fn test_claim_marks_item_and_returns_post_update() {
        let store = create_test_store();
        let created = store.create(create_request(&["720p"])).unwrap();
        let filter = ClaimFilter::for_stage(Stage::Pending).unwrap();

        let claimed = store
            .claim(&filter, &filter.claim_patch("w-1"))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, created.id);
        assert_eq!(claimed.stage, Stage::Resolving);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w-1"));

        let stored = store.get(&created.id).unwrap().unwrap();
        assert_eq!(stored, claimed);

        assert!(store
            .claim(&filter, &filter.claim_patch("w-2"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_claim_picks_oldest_first() {
        let store = create_test_store();
        let first = store.create(create_request(&["a"])).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let _second = store.create(create_request(&["b"])).unwrap();

        let filter = ClaimFilter::for_stage(Stage::Pending).unwrap();
        let claimed = store
            .claim(&filter, &filter.claim_patch("w-1"))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[test]
    fn test_failed_patch_rolls_back() {
        let store = create_test_store();
        let created = store.create(create_request(&["720p"])).unwrap();

        let bad = ItemPatch::new()
            .direct_url("720p".into(), "https://cdn.example/a")
            .transfer("1080p".into(), TransferRecord::completed("/x", 1, Utc::now()));
        assert!(store.update(&created.id, &bad).is_err());

        let stored = store.get(&created.id).unwrap().unwrap();
        assert!(stored.direct_urls.is_empty());
    }

    #[test]
    fn test_update_missing_item() {
        let store = create_test_store();
        let err = store
            .update("nope", &ItemPatch::new().completed())
            .unwrap_err();
        assert!(matches!(err, ItemError::NotFound(_)));
    }

    #[test]
    fn test_list_and_count_by_stage() {
        let store = create_test_store();
        for _ in 0..3 {
            store.create(create_request(&["720p"])).unwrap();
        }
        let filter = ClaimFilter::for_stage(Stage::Pending).unwrap();
        store.claim(&filter, &filter.claim_patch("w-1")).unwrap();

        let counts = store.count_by_stage().unwrap();
        assert_eq!(counts.get(&Stage::Pending), Some(&2));
        assert_eq!(counts.get(&Stage::Resolving), Some(&1));
        assert_eq!(counts.get(&Stage::Completed), None);

        let pending = store
            .list(&ItemFilter::new().with_stage(Stage::Pending))
            .unwrap();
        assert_eq!(pending.len(), 2);

        let page = store.list(&ItemFilter::new().with_limit(2)).unwrap();
        assert_eq!(page.len(), 2);
        let rest = store
            .list(&ItemFilter::new().with_limit(2).with_offset(2))
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_record_failure_is_atomic_increment() {
        let store = create_test_store();
        store.create(create_request(&["720p"])).unwrap();
        let filter = ClaimFilter::for_stage(Stage::Pending).unwrap();
        let claimed = store
            .claim(&filter, &filter.claim_patch("w-1"))
            .unwrap()
            .unwrap();

        let failed = store
            .update(
                &claimed.id,
                &ItemPatch::owned_by("w-1").record_failure("resolver down", 3, 5),
            )
            .unwrap();
        assert_eq!(failed.stage, Stage::Error);
        assert_eq!(failed.error_count, 1);
        assert_eq!(failed.failed_stage, Some(Stage::Resolving));
    }

    fn fail_in_resolve(store: &SqliteItemStore, count: usize) {
        let filter = ClaimFilter::for_stage(Stage::Pending).unwrap();
        for _ in 0..count {
            store.create(create_request(&["720p"])).unwrap();
            let claimed = store
                .claim(&filter, &filter.claim_patch("w-old"))
                .unwrap()
                .unwrap();
            store
                .update(
                    &claimed.id,
                    &ItemPatch::owned_by("w-old").record_failure("resolver down", 3, 5),
                )
                .unwrap();
        }
    }

    #[test]
    fn test_cooling_down_errors_do_not_hide_pending_items() {
        let store = create_test_store();
        fail_in_resolve(&store, 10);
        let fresh = store.create(create_request(&["720p"])).unwrap();

        let filter = ClaimFilter::for_stage(Stage::Pending)
            .unwrap()
            .with_stale_after(Duration::from_secs(3600))
            .with_error_cooldown(Duration::from_secs(300))
            .with_scan_limit(5);
        let claimed = store
            .claim(&filter, &filter.claim_patch("w-1"))
            .unwrap()
            .expect("pending item should be claimable");
        assert_eq!(claimed.id, fresh.id);
        assert!(store
            .claim(&filter, &filter.claim_patch("w-1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_errors_of_other_roles_do_not_hide_ready_items() {
        let store = create_test_store();
        fail_in_resolve(&store, 10);

        let ready = store.create(create_request(&["720p"])).unwrap();
        store
            .update(
                &ready.id,
                &ItemPatch::new()
                    .claim(Stage::Resolving, "w-resolve")
                    .direct_url("720p".into(), "https://cdn.example/a.mp4")
                    .stage(Stage::ReadyForTransfer),
            )
            .unwrap();

        let transfer = ClaimFilter::for_stage(Stage::ReadyForTransfer)
            .unwrap()
            .with_stale_after(Duration::from_secs(3600))
            .with_error_cooldown(Duration::ZERO)
            .with_scan_limit(5);
        let claimed = store
            .claim(&transfer, &transfer.claim_patch("w-2"))
            .unwrap()
            .expect("ready item should be claimable");
        assert_eq!(claimed.id, ready.id);
        assert_eq!(claimed.stage, Stage::Transferring);

        // the resolve role still retries its own cooled-down failures
        let resolve = ClaimFilter::for_stage(Stage::Pending)
            .unwrap()
            .with_error_cooldown(Duration::ZERO);
        let retried = store
            .claim(&resolve, &resolve.claim_patch("w-3"))
            .unwrap()
            .unwrap();
        assert_eq!(retried.stage, Stage::Resolving);
        assert_eq!(retried.error_count, 1);
    }

    #[test]
    fn test_opens_database_without_failure_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE items (
                    id TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL,
                    stage TEXT NOT NULL,
                    last_updated TEXT NOT NULL,
                    document TEXT NOT NULL
                );",
            )
            .unwrap();
        }

        let store = SqliteItemStore::new(&path).unwrap();
        fail_in_resolve(&store, 1);
        let counts = store.count_by_stage().unwrap();
        assert_eq!(counts.get(&Stage::Error), Some(&1));
    }

    #[test]
    fn test_item_out_of_resets_is_not_claimed() {
        let store = create_test_store();
        let item = store.create(create_request(&["720p"])).unwrap();
        let filter = ClaimFilter::for_stage(Stage::Pending)
            .unwrap()
            .with_error_cooldown(Duration::ZERO);
        store.claim(&filter, &filter.claim_patch("w-1")).unwrap().unwrap();

        let failed = store
            .update(
                &item.id,
                &ItemPatch::owned_by("w-1").record_failure("gone for good", 1, 0),
            )
            .unwrap();
        assert_eq!(failed.stage, Stage::Error);
        assert!(failed.failed_stage.is_none());

        for stage in [Stage::Pending, Stage::ReadyForTransfer, Stage::ReadyForPublish] {
            let filter = ClaimFilter::for_stage(stage)
                .unwrap()
                .with_error_cooldown(Duration::ZERO);
            assert!(store
                .claim(&filter, &filter.claim_patch("w-2"))
                .unwrap()
                .is_none());
        }
    }
}
