//! `SQLite` graph store.
//!
//! Models the property graph with plain tables and executes the typed form of
//! each [`Statement`]. Every committed batch appends a row to `graph_commits`;
//! its sequence number, qualified by a per-database store id, is the bookmark.

// SQLite change counts are usize and never negative or near u64::MAX.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::models::RelationType;
use crate::storage::statement::{GraphOp, Statement};
use crate::storage::traits::{
    Bookmark, GraphStore, Row, StatementSummary, StoreError, WriteOutcome,
};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::instrument;

/// Prefix of every bookmark issued by this backend.
const BOOKMARK_SCHEME: &str = "sqlite";

/// Label set of nodes merged by this service.
const THING_LABELS: &str = r#"["Thing"]"#;

/// Relationship properties projected by scoped reads.
const PROJECTED_PROPERTIES: &[&str] = &[
    "relevanceScore",
    "confidenceScore",
    "annotatedBy",
    "annotatedDate",
    "annotatedDateEpoch",
];

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS graph_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS graph_things (
        node_id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL,
        pref_label TEXT,
        labels TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS graph_relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_uuid TEXT NOT NULL,
        to_uuid TEXT NOT NULL,
        rel_type TEXT NOT NULL,
        lifecycle TEXT,
        platform_version TEXT,
        properties TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_graph_relationships_scope
        ON graph_relationships(from_uuid, lifecycle);
    CREATE INDEX IF NOT EXISTS idx_graph_relationships_platform
        ON graph_relationships(platform_version);

    CREATE TABLE IF NOT EXISTS graph_commits (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        committed_at INTEGER NOT NULL
    );
";

/// Acquires the connection lock, surfacing poisoning as a store error.
fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| {
        tracing::error!("Graph store mutex was poisoned");
        metrics::counter!("graph_store_mutex_poisoned_total").increment(1);
        StoreError::Poisoned
    })
}

/// `SQLite`-based graph store.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. Writes run inside an
/// `IMMEDIATE` transaction, so concurrent batches against the same scope are
/// serialized and the last to commit wins.
///
/// # Schema
///
/// - `graph_things`: "Thing" nodes keyed by `uuid`
/// - `graph_relationships`: typed edges with a JSON property bag; `lifecycle`
///   and `platform_version` are lifted out of the bag for scoping and counting
/// - `graph_commits`: one row per committed batch
/// - `graph_meta`: the store id embedded in bookmarks
pub struct SqliteGraphStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
    /// Identifier embedded in bookmarks issued by this database.
    store_id: String,
}

impl SqliteGraphStore {
    /// Opens (or creates) a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path)?;

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");

        Self::initialize(conn, Some(db_path))
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, db_path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO graph_meta (key, value) VALUES ('store_id', ?1)",
            params![uuid::Uuid::new_v4().simple().to_string()],
        )?;
        let store_id: String = conn.query_row(
            "SELECT value FROM graph_meta WHERE key = 'store_id'",
            [],
            |row| row.get(0),
        )?;

        tracing::debug!(store_id = %store_id, path = ?db_path, "Opened graph store");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            store_id,
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Returns the identifier embedded in this store's bookmarks.
    #[must_use]
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Returns true if a node with this identifier exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn node_exists(&self, uuid: &str) -> Result<bool, StoreError> {
        let conn = acquire_lock(&self.conn)?;
        let found = conn
            .query_row(
                "SELECT 1 FROM graph_things WHERE uuid = ?1",
                params![uuid],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Counts relationships leaving a node, across all lifecycles.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn relationship_count(&self, from_uuid: &str) -> Result<u64, StoreError> {
        let conn = acquire_lock(&self.conn)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM graph_relationships WHERE from_uuid = ?1",
            params![from_uuid],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn parse_bookmark(&self, bookmark: &Bookmark) -> Result<i64, StoreError> {
        let invalid = || StoreError::InvalidBookmark(bookmark.to_string());
        let mut parts = bookmark.as_str().splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(BOOKMARK_SCHEME), Some(store_id), Some(seq)) if store_id == self.store_id => {
                seq.parse::<i64>().map_err(|_| invalid())
            },
            _ => Err(invalid()),
        }
    }

    fn check_bookmarks(&self, conn: &Connection, bookmarks: &[Bookmark]) -> Result<(), StoreError> {
        if bookmarks.is_empty() {
            return Ok(());
        }

        let latest: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM graph_commits",
            [],
            |row| row.get(0),
        )?;

        for bookmark in bookmarks {
            let requested = self.parse_bookmark(bookmark)?;
            if requested > latest {
                return Err(StoreError::BookmarkNotReached { requested, latest });
            }
        }
        Ok(())
    }
}

/// Creates the node if missing; returns the number of nodes created.
fn merge_thing(tx: &Transaction<'_>, uuid: &str) -> Result<u64, StoreError> {
    let exists = tx
        .query_row(
            "SELECT 1 FROM graph_things WHERE uuid = ?1",
            params![uuid],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if exists {
        return Ok(0);
    }

    tx.execute(
        "INSERT INTO graph_things (uuid, labels) VALUES (?1, ?2)",
        params![uuid, THING_LABELS],
    )?;
    Ok(1)
}

fn merge_relationship(
    tx: &Transaction<'_>,
    from_id: &str,
    to_id: &str,
    relation: &RelationType,
    lifecycle: Option<&str>,
    properties: &Map<String, Value>,
) -> Result<StatementSummary, StoreError> {
    let mut summary = StatementSummary {
        nodes_created: merge_thing(tx, from_id)? + merge_thing(tx, to_id)?,
        properties_set: properties.len() as u64,
        ..StatementSummary::default()
    };

    let bag = serde_json::to_string(properties)?;
    let stored_lifecycle = properties.get("lifecycle").and_then(Value::as_str);
    let platform_version = properties.get("platformVersion").and_then(Value::as_str);

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM graph_relationships
             WHERE from_uuid = ?1 AND to_uuid = ?2 AND rel_type = ?3 AND lifecycle IS ?4",
            params![from_id, to_id, relation.as_str(), lifecycle],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            tx.execute(
                "UPDATE graph_relationships
                 SET lifecycle = ?2, platform_version = ?3, properties = ?4
                 WHERE id = ?1",
                params![id, stored_lifecycle, platform_version, bag],
            )?;
        },
        None => {
            tx.execute(
                "INSERT INTO graph_relationships
                 (from_uuid, to_uuid, rel_type, lifecycle, platform_version, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    from_id,
                    to_id,
                    relation.as_str(),
                    stored_lifecycle,
                    platform_version,
                    bag
                ],
            )?;
            summary.relationships_created = 1;
        },
    }

    Ok(summary)
}

fn apply_write(tx: &Transaction<'_>, op: &GraphOp) -> Result<StatementSummary, StoreError> {
    match op {
        GraphOp::DeleteScoped {
            content_id,
            lifecycle,
        } => {
            let deleted = tx.execute(
                "DELETE FROM graph_relationships WHERE from_uuid = ?1 AND lifecycle = ?2",
                params![content_id, lifecycle],
            )?;
            Ok(StatementSummary {
                relationships_deleted: deleted as u64,
                ..StatementSummary::default()
            })
        },
        GraphOp::MergeRelationship {
            from_id,
            to_id,
            relation,
            lifecycle,
            properties,
        } => merge_relationship(tx, from_id, to_id, relation, lifecycle.as_deref(), properties),
        GraphOp::ReadScoped { .. } | GraphOp::CountRelationships { .. } => Err(
            StoreError::UnsupportedStatement(format!("{} in a write batch", op.kind())),
        ),
    }
}

fn project_relationship(
    id: String,
    pref_label: Option<String>,
    labels: &str,
    rel_type: String,
    properties: &str,
) -> Result<Row, StoreError> {
    let labels: Value = serde_json::from_str(labels)?;
    let properties: Map<String, Value> = serde_json::from_str(properties)?;

    let mut row = Row::new();
    row.insert("id".to_string(), Value::String(id));
    if let Some(label) = pref_label {
        row.insert("prefLabel".to_string(), Value::String(label));
    }
    row.insert("types".to_string(), labels);
    row.insert("predicate".to_string(), Value::String(rel_type));
    for key in PROJECTED_PROPERTIES {
        if let Some(value) = properties.get(*key) {
            row.insert((*key).to_string(), value.clone());
        }
    }
    Ok(row)
}

fn read_scoped(conn: &Connection, content_id: &str, lifecycle: &str) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT r.to_uuid, t.pref_label, t.labels, r.rel_type, r.properties
         FROM graph_relationships r
         JOIN graph_things c ON c.uuid = r.from_uuid
         JOIN graph_things t ON t.uuid = r.to_uuid
         WHERE r.from_uuid = ?1 AND r.lifecycle = ?2
         ORDER BY r.to_uuid, r.id",
    )?;

    let raw = stmt
        .query_map(params![content_id, lifecycle], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, pref_label, labels, rel_type, properties)| {
            project_relationship(id, pref_label, &labels, rel_type, &properties)
        })
        .collect()
}

fn count_relationships(
    conn: &Connection,
    lifecycle: &str,
    platform_version: &str,
) -> Result<Vec<Row>, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM graph_relationships
         WHERE platform_version = ?1 AND (lifecycle = ?2 OR lifecycle IS NULL)",
        params![platform_version, lifecycle],
        |row| row.get(0),
    )?;

    let mut row = Row::new();
    row.insert("c".to_string(), Value::from(count));
    Ok(vec![row])
}

impl GraphStore for SqliteGraphStore {
    #[instrument(skip(self, statements), fields(statement_count = statements.len()))]
    fn write_batch(&self, statements: &[Statement]) -> Result<WriteOutcome, StoreError> {
        let mut conn = acquire_lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut summaries = Vec::with_capacity(statements.len());
        for statement in statements {
            let summary = apply_write(&tx, &statement.op)?;
            summaries.push(statement.include_summary.then_some(summary));
        }

        tx.execute(
            "INSERT INTO graph_commits (committed_at) VALUES (?1)",
            params![chrono::Utc::now().timestamp_millis()],
        )?;
        let seq = tx.last_insert_rowid();
        tx.commit()?;

        let bookmark = Bookmark::new(format!("{BOOKMARK_SCHEME}:{}:{seq}", self.store_id));
        tracing::debug!(bookmark = %bookmark, "Committed graph batch");

        Ok(WriteOutcome {
            bookmark,
            summaries,
        })
    }

    #[instrument(skip(self, statement, bookmarks), fields(op = statement.op.kind()))]
    fn read(&self, statement: &Statement, bookmarks: &[Bookmark]) -> Result<Vec<Row>, StoreError> {
        let conn = acquire_lock(&self.conn)?;
        self.check_bookmarks(&conn, bookmarks)?;

        let rows = match &statement.op {
            GraphOp::ReadScoped {
                content_id,
                lifecycle,
            } => read_scoped(&conn, content_id, lifecycle)?,
            GraphOp::CountRelationships {
                lifecycle,
                platform_version,
            } => count_relationships(&conn, lifecycle, platform_version)?,
            GraphOp::DeleteScoped { .. } | GraphOp::MergeRelationship { .. } => {
                return Err(StoreError::UnsupportedStatement(format!(
                    "{} in a read",
                    statement.op.kind()
                )));
            },
        };

        if rows.is_empty() {
            return Err(StoreError::NoResults);
        }
        Ok(rows)
    }

    fn verify_connectivity(&self) -> Result<(), StoreError> {
        let conn = acquire_lock(&self.conn)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn ensure_constraints(&self) -> Result<(), StoreError> {
        let conn = acquire_lock(&self.conn)?;
        conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_graph_things_uuid ON graph_things(uuid);",
        )?;
        tracing::info!("Ensured uniqueness constraint on Thing.uuid");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONTENT: &str = "32b089d2-2aae-403d-be6e-877404f586cf";
    const CONCEPT: &str = "a7732a22-3884-4bfe-9761-fef161e41d69";

    fn merge(to_id: &str, lifecycle: Option<&str>, properties: Value) -> Statement {
        let Value::Object(properties) = properties else {
            panic!("properties must be an object");
        };
        Statement::new(
            "MERGE",
            Map::new(),
            GraphOp::MergeRelationship {
                from_id: CONTENT.to_string(),
                to_id: to_id.to_string(),
                relation: RelationType::new("MENTIONS").unwrap(),
                lifecycle: lifecycle.map(str::to_string),
                properties,
            },
        )
    }

    fn delete(lifecycle: &str) -> Statement {
        Statement::new(
            "DELETE",
            Map::new(),
            GraphOp::DeleteScoped {
                content_id: CONTENT.to_string(),
                lifecycle: lifecycle.to_string(),
            },
        )
        .with_summary(true)
    }

    fn read(lifecycle: &str) -> Statement {
        Statement::new(
            "READ",
            Map::new(),
            GraphOp::ReadScoped {
                content_id: CONTENT.to_string(),
                lifecycle: lifecycle.to_string(),
            },
        )
    }

    #[test]
    fn test_write_returns_sequenced_bookmarks() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let first = store
            .write_batch(&[merge(CONCEPT, Some("l1"), json!({"lifecycle": "l1"}))])
            .unwrap();
        let second = store
            .write_batch(&[merge(CONCEPT, Some("l1"), json!({"lifecycle": "l1"}))])
            .unwrap();

        assert_eq!(
            first.bookmark.as_str(),
            format!("sqlite:{}:1", store.store_id())
        );
        assert_eq!(
            second.bookmark.as_str(),
            format!("sqlite:{}:2", store.store_id())
        );
        assert_eq!(first.summaries, vec![None]);
    }

    #[test]
    fn test_merge_replaces_property_bag() {
        let store = SqliteGraphStore::in_memory().unwrap();
        store
            .write_batch(&[merge(
                CONCEPT,
                Some("l1"),
                json!({"lifecycle": "l1", "relevanceScore": 0.9}),
            )])
            .unwrap();
        store
            .write_batch(&[merge(
                CONCEPT,
                Some("l1"),
                json!({"lifecycle": "l1", "confidenceScore": 0.5}),
            )])
            .unwrap();

        let rows = store.read(&read("l1"), &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("confidenceScore"), Some(&json!(0.5)));
        assert_eq!(rows[0].get("relevanceScore"), None);
        assert_eq!(rows[0].get("types"), Some(&json!(["Thing"])));
        assert_eq!(rows[0].get("predicate"), Some(&json!("MENTIONS")));
    }

    #[test]
    fn test_delete_summary_counts_scope_only() {
        let store = SqliteGraphStore::in_memory().unwrap();
        store
            .write_batch(&[
                merge(CONCEPT, Some("l1"), json!({"lifecycle": "l1"})),
                merge(CONCEPT, Some("l2"), json!({"lifecycle": "l2"})),
            ])
            .unwrap();

        let outcome = store.write_batch(&[delete("l1")]).unwrap();
        let summary = outcome.summaries[0].unwrap();
        assert_eq!(summary.relationships_deleted, 1);
        assert!(store.read(&read("l2"), &[]).is_ok());
        assert!(store.node_exists(CONTENT).unwrap());
        assert!(store.node_exists(CONCEPT).unwrap());
    }

    #[test]
    fn test_empty_read_is_no_results() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let err = store.read(&read("l1"), &[]).unwrap_err();
        assert!(err.is_no_results());
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let err = store
            .write_batch(&[
                merge(CONCEPT, Some("l1"), json!({"lifecycle": "l1"})),
                read("l1"),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedStatement(_)));
        assert!(!store.node_exists(CONTENT).unwrap());
        assert_eq!(store.relationship_count(CONTENT).unwrap(), 0);
    }

    #[test]
    fn test_bookmark_validation() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let outcome = store
            .write_batch(&[merge(CONCEPT, Some("l1"), json!({"lifecycle": "l1"}))])
            .unwrap();
        assert!(store.read(&read("l1"), &[outcome.bookmark]).is_ok());

        let foreign = Bookmark::new("sqlite:someotherstore:1");
        assert!(matches!(
            store.read(&read("l1"), &[foreign]),
            Err(StoreError::InvalidBookmark(_))
        ));

        let ahead = Bookmark::new(format!("sqlite:{}:99", store.store_id()));
        assert!(matches!(
            store.read(&read("l1"), &[ahead]),
            Err(StoreError::BookmarkNotReached {
                requested: 99,
                latest: 1
            })
        ));
    }

    #[test]
    fn test_count_includes_untagged() {
        let store = SqliteGraphStore::in_memory().unwrap();
        store
            .write_batch(&[
                merge(
                    CONCEPT,
                    Some("l1"),
                    json!({"lifecycle": "l1", "platformVersion": "v2"}),
                ),
                merge(
                    "c834adfa-10c9-4748-8a21-c08537172706",
                    None,
                    json!({"platformVersion": "v2"}),
                ),
            ])
            .unwrap();

        let count = Statement::new(
            "COUNT",
            Map::new(),
            GraphOp::CountRelationships {
                lifecycle: "l1".to_string(),
                platform_version: "v2".to_string(),
            },
        );
        let rows = store.read(&count, &[]).unwrap();
        assert_eq!(rows[0].get("c"), Some(&json!(2)));
    }

    #[test]
    fn test_constraints_idempotent() {
        let store = SqliteGraphStore::in_memory().unwrap();
        store.ensure_constraints().unwrap();
        store.ensure_constraints().unwrap();
        store.verify_connectivity().unwrap();
    }

    #[test]
    fn test_file_store_keeps_store_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let first = SqliteGraphStore::open(&path).unwrap();
        let store_id = first.store_id().to_string();
        drop(first);

        let reopened = SqliteGraphStore::open(&path).unwrap();
        assert_eq!(reopened.store_id(), store_id);
        assert_eq!(reopened.db_path(), Some(path.as_path()));
    }
}
