//! Anchor Store
//!
//! Durable home of persisted anchors: a SQLite database with one row per
//! anchor, an LRU cache of decoded records in front of it, and transactional
//! sessions for writing parts of an [`ObjectGraph`].
//!
//! One store is shared (behind an `Arc`) by every execution context in the
//! process. The connection lives behind a mutex, so each write session holds
//! it from `BEGIN` to `COMMIT`/`ROLLBACK` and writers serialize.
//!
//! Other connections (another store on the same file, or another process)
//! may commit at any time. Every time the connection is taken the store
//! compares SQLite's `data_version` with the last one it saw and drops the
//! whole cache when it moved. Cache lookups and fills happen only while the
//! connection lock is held.
//!
//! A thread that holds a [`StoreSession`] must not call read methods on the
//! same store until the session ends.

mod cache;
mod record;
mod schema;
mod session;

pub use cache::{CacheMetrics, RecordCache};
pub use record::{AnchorRecord, RecordLinks};
pub use schema::ANCHOR_SCHEMA_VERSION;
pub use session::StoreSession;

use crate::anchor::{Anchor, AnchorId, AnchorKind, LazyRef};
use crate::graph::{AnchorSource, ObjectGraph};
use crate::registry::TypeRegistry;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use schema::{SCHEMA_CREATE_ANCHORS, SCHEMA_CREATE_INDEXES, SCHEMA_CREATE_METADATA};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use walkgraph_config::StorageConfig;

/// Default number of records kept in the read cache
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Default wait on a locked database
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: String, found: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record {id}: {message}")]
    BadRecord { id: AnchorId, message: String },
}

/// Counters describing store traffic since open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    /// Rows written for anchors that were never persisted
    pub inserts: u64,
    /// Rows rewritten for mutated anchors
    pub updates: u64,
    /// Rows removed for disconnected edges
    pub deletes: u64,
    /// Records read from the database
    pub reads: u64,
    /// Records answered from the cache
    pub cache_hits: u64,
}

impl StoreMetrics {
    /// Total rows written (inserts and updates)
    pub fn writes(&self) -> u64 {
        self.inserts + self.updates
    }
}

/// Shared, transactional anchor storage.
pub struct AnchorStore {
    conn: Mutex<Connection>,
    registry: Arc<TypeRegistry>,
    cache: RecordCache,
    metrics: Mutex<StoreMetrics>,
    /// Last `PRAGMA data_version` seen; only touched under the connection lock
    data_version: AtomicI64,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for AnchorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorStore")
            .field("path", &self.path)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl AnchorStore {
    /// Open (or create) a store database at `path`.
    pub fn open(path: &Path, registry: Arc<TypeRegistry>) -> Result<Self, StoreError> {
        Self::open_with(path, registry, DEFAULT_CACHE_CAPACITY, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Open the store described by a storage configuration section.
    pub fn open_with_config(
        config: &StorageConfig,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self, StoreError> {
        Self::open_with(
            &config.path,
            registry,
            config.cache_capacity,
            config.busy_timeout_ms,
        )
    }

    fn open_with(
        path: &Path,
        registry: Arc<TypeRegistry>,
        cache_capacity: usize,
        busy_timeout_ms: u64,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn, busy_timeout_ms)?;
        let store = Self::initialize(conn, registry, cache_capacity, Some(path.to_path_buf()))?;
        info!("Opened anchor store at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory(registry: Arc<TypeRegistry>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn, DEFAULT_BUSY_TIMEOUT_MS)?;
        Self::initialize(conn, registry, DEFAULT_CACHE_CAPACITY, None)
    }

    fn configure_connection(conn: &Connection, busy_timeout_ms: u64) -> SqliteResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        // Negative value = KB
        conn.pragma_update(None, "cache_size", -16000)?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        Ok(())
    }

    fn initialize(
        conn: Connection,
        registry: Arc<TypeRegistry>,
        cache_capacity: usize,
        path: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        conn.execute(SCHEMA_CREATE_ANCHORS, [])?;
        conn.execute(SCHEMA_CREATE_METADATA, [])?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES)?;
        let data_version = read_data_version(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            registry,
            cache: RecordCache::new(cache_capacity),
            metrics: Mutex::new(StoreMetrics::default()),
            data_version: AtomicI64::new(data_version),
            path,
        };

        match store.get_metadata("schema_version")? {
            None => store.set_metadata("schema_version", ANCHOR_SCHEMA_VERSION)?,
            Some(version) if version == ANCHOR_SCHEMA_VERSION => {}
            Some(found) => {
                return Err(StoreError::SchemaVersionMismatch {
                    expected: ANCHOR_SCHEMA_VERSION.to_string(),
                    found,
                })
            }
        }
        Ok(store)
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Database file, if the store is on disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM store_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO store_metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Fetch the stored record for `id`, going through the cache.
    pub fn find_by_id(&self, id: AnchorId) -> Result<Option<AnchorRecord>, StoreError> {
        let conn = self.connection()?;
        if let Some(record) = self.cache.get(&id) {
            self.metrics.lock().cache_hits += 1;
            return Ok(Some(record));
        }

        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM anchors WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(document) = document else {
            return Ok(None);
        };

        let record: AnchorRecord = serde_json::from_str(&document)?;
        if record.id != id {
            return Err(StoreError::BadRecord {
                id,
                message: format!("document carries id {}", record.id),
            });
        }
        self.metrics.lock().reads += 1;
        self.cache.insert(record.clone());
        Ok(Some(record))
    }

    /// Load the anchor stored under `id` if its class is still registered.
    pub fn load(&self, id: AnchorId) -> Result<Option<Anchor>, StoreError> {
        let Some(record) = self.find_by_id(id)? else {
            return Ok(None);
        };
        if !self.class_matches(&record.lazy_ref()) {
            return Ok(None);
        }
        record.into_anchor().map(Some)
    }

    fn class_matches(&self, lazy: &LazyRef) -> bool {
        let expected = match lazy.kind {
            AnchorKind::Root | AnchorKind::Node => AnchorKind::Node,
            AnchorKind::Edge => AnchorKind::Edge,
            AnchorKind::Walker => return false,
        };
        match self.registry.expect_kind(&lazy.name, expected) {
            Ok(class) => lazy.kind != AnchorKind::Root || class.kind() == AnchorKind::Root,
            Err(err) => {
                debug!("Not resolving {}: {}", lazy.id, err);
                false
            }
        }
    }

    pub fn contains(&self, id: AnchorId) -> Result<bool, StoreError> {
        Ok(self.find_by_id(id)?.is_some())
    }

    /// Number of persisted anchors
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM anchors", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Start an explicit write session (`BEGIN IMMEDIATE`).
    pub fn session(&self) -> Result<StoreSession<'_>, StoreError> {
        StoreSession::begin(self)
    }

    /// Persist one anchor (and whatever it drags along) in its own transaction.
    ///
    /// Any failure rolls the transaction back and returns the original error.
    pub fn save(&self, graph: &mut ObjectGraph, id: AnchorId) -> Result<(), StoreError> {
        let result = self.session().and_then(|mut session| {
            session.save(graph, id)?;
            session.commit(graph)
        });
        if let Err(err) = &result {
            error!("Save of {} aborted: {}", id, err);
        }
        result.map(|_| ())
    }

    /// Persist every new or mutated anchor of `graph` in one transaction.
    ///
    /// Returns the number of rows written or deleted.
    pub fn flush(&self, graph: &mut ObjectGraph) -> Result<usize, StoreError> {
        let result = self.session().and_then(|mut session| {
            for id in graph.unsaved_ids() {
                session.save(graph, id)?;
            }
            session.commit(graph)
        });
        if let Err(err) = &result {
            error!("Flush aborted: {}", err);
        }
        result
    }

    /// Snapshot of the traffic counters
    pub fn metrics(&self) -> StoreMetrics {
        self.metrics.lock().clone()
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    pub(crate) fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub(crate) fn record_commit(&self, inserts: u64, updates: u64, deletes: u64) {
        let mut metrics = self.metrics.lock();
        metrics.inserts += inserts;
        metrics.updates += updates;
        metrics.deletes += deletes;
    }

    /// Lock the connection, dropping the cache if another connection
    /// committed since the last time it was taken.
    pub(crate) fn connection(
        &self,
    ) -> Result<parking_lot::MutexGuard<'_, Connection>, StoreError> {
        let conn = self.conn.lock();
        let version = read_data_version(&conn)?;
        let seen = self.data_version.swap(version, Ordering::AcqRel);
        if seen != version {
            debug!(
                "Database changed elsewhere (data_version {} -> {}), clearing cache",
                seen, version
            );
            self.cache.clear();
        }
        Ok(conn)
    }
}

fn read_data_version(conn: &Connection) -> SqliteResult<i64> {
    conn.query_row("PRAGMA data_version", [], |row| row.get(0))
}

impl AnchorSource for AnchorStore {
    fn resolve(&self, lazy: &LazyRef) -> Result<Option<Anchor>, StoreError> {
        if !self.class_matches(lazy) {
            return Ok(None);
        }
        let Some(record) = self.find_by_id(lazy.id)? else {
            return Ok(None);
        };
        if record.kind != lazy.kind || record.name != lazy.name {
            debug!("Stored {} no longer matches its reference", lazy.id);
            return Ok(None);
        }
        record.into_anchor().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{Architype, EdgeDir};
    use crate::registry::ArchitypeClass;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn registry() -> Arc<TypeRegistry> {
        TypeRegistry::new()
            .with(ArchitypeClass::node("City"))
            .unwrap()
            .with(ArchitypeClass::edge("Road"))
            .unwrap()
            .with(ArchitypeClass::edge("Fragile"))
            .unwrap()
            .freeze()
    }

    fn graph_for(store: &Arc<AnchorStore>) -> ObjectGraph {
        ObjectGraph::with_source(store.registry().clone(), store.clone())
    }

    #[test]
    fn test_open_creates_schema_and_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("graph.db");

        let store = AnchorStore::open(&path, registry()).unwrap();
        assert!(path.exists());
        assert_eq!(
            store.get_metadata("schema_version").unwrap().as_deref(),
            Some(ANCHOR_SCHEMA_VERSION)
        );
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_rejects_unknown_schema_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("graph.db");
        {
            let store = AnchorStore::open(&path, registry()).unwrap();
            store.set_metadata("schema_version", "9.9").unwrap();
        }

        let err = AnchorStore::open(&path, registry()).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersionMismatch { .. }));
    }

    #[test]
    fn test_save_writes_connected_component() {
        let store = Arc::new(AnchorStore::in_memory(registry()).unwrap());
        let mut graph = graph_for(&store);
        let a = graph.add_node(Architype::new("City")).unwrap();
        let b = graph.add_node(Architype::new("City")).unwrap();
        let edge = graph
            .connect(a, b, Architype::new("Road"), EdgeDir::Out)
            .unwrap();

        store.save(&mut graph, a).unwrap();

        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.metrics().inserts, 3);
        for id in [a, b, edge] {
            assert!(graph.get(id).unwrap().is_persisted());
            assert!(!graph.get(id).unwrap().is_dirty());
        }
    }

    #[test]
    fn test_resave_without_mutation_writes_nothing() {
        let store = Arc::new(AnchorStore::in_memory(registry()).unwrap());
        let mut graph = graph_for(&store);
        let a = graph.add_node(Architype::new("City")).unwrap();
        store.save(&mut graph, a).unwrap();
        let before = store.metrics();

        store.save(&mut graph, a).unwrap();
        assert_eq!(store.metrics().writes(), before.writes());

        graph.set_field(a, "population", 5).unwrap();
        store.save(&mut graph, a).unwrap();
        assert_eq!(store.metrics().updates, before.updates + 1);

        let record = store.find_by_id(a).unwrap().unwrap();
        assert_eq!(record.ctx.get("population"), Some(&json!(5)));
    }

    #[test]
    fn test_failed_edge_rolls_back_everything() {
        let store = Arc::new(AnchorStore::in_memory(registry()).unwrap());
        store
            .connection()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_fragile BEFORE INSERT ON anchors
                 WHEN NEW.name = 'Fragile'
                 BEGIN SELECT RAISE(ABORT, 'fragile edge'); END;",
            )
            .unwrap();

        let mut graph = graph_for(&store);
        let root = graph.add_node(Architype::new("City")).unwrap();
        let a = graph.add_node(Architype::new("City")).unwrap();
        let b = graph.add_node(Architype::new("City")).unwrap();
        graph
            .connect(root, a, Architype::new("Road"), EdgeDir::Out)
            .unwrap();
        graph
            .connect(root, b, Architype::new("Fragile"), EdgeDir::Out)
            .unwrap();

        let err = store.save(&mut graph, root).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert_eq!(store.count().unwrap(), 0);
        assert!(!graph.get(root).unwrap().is_persisted());
        assert!(!graph.get(a).unwrap().is_persisted());
        assert_eq!(store.metrics().writes(), 0);

        // The connection is usable again after the rollback
        let lone = graph.add_node(Architype::new("City")).unwrap();
        store.save(&mut graph, lone).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_disconnect_deletes_persisted_edge() {
        let store = Arc::new(AnchorStore::in_memory(registry()).unwrap());
        let mut graph = graph_for(&store);
        let a = graph.add_node(Architype::new("City")).unwrap();
        let b = graph.add_node(Architype::new("City")).unwrap();
        let edge = graph
            .connect(a, b, Architype::new("Road"), EdgeDir::Out)
            .unwrap();
        store.flush(&mut graph).unwrap();

        graph.disconnect_edge(edge).unwrap();
        store.flush(&mut graph).unwrap();

        assert!(store.find_by_id(edge).unwrap().is_none());
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.metrics().deletes, 1);
        assert!(!graph.has_unsaved_changes());
    }

    #[test]
    fn test_resolve_checks_registry_and_reference() {
        let store = Arc::new(AnchorStore::in_memory(registry()).unwrap());
        let mut graph = graph_for(&store);
        let a = graph.add_node(Architype::new("City")).unwrap();
        store.save(&mut graph, a).unwrap();
        let lazy = graph.get(a).unwrap().lazy_ref();

        let resolved = store.resolve(&lazy).unwrap().unwrap();
        assert_eq!(resolved.id(), a);
        assert!(!resolved.is_local_owner());

        let mut renamed = lazy.clone();
        renamed.name = "Village".to_string();
        assert!(store.resolve(&renamed).unwrap().is_none());

        let mut wrong_kind = lazy;
        wrong_kind.kind = AnchorKind::Edge;
        assert!(store.resolve(&wrong_kind).unwrap().is_none());
    }

    #[test]
    fn test_reads_are_cached() {
        let store = Arc::new(AnchorStore::in_memory(registry()).unwrap());
        let mut graph = graph_for(&store);
        let a = graph.add_node(Architype::new("City")).unwrap();
        store.save(&mut graph, a).unwrap();

        store.find_by_id(a).unwrap();
        store.find_by_id(a).unwrap();

        let metrics = store.metrics();
        assert_eq!(metrics.reads, 1);
        assert_eq!(metrics.cache_hits, 1);
    }

    #[test]
    fn test_commit_from_other_handle_clears_cache() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("graph.db");
        let reader = Arc::new(AnchorStore::open(&path, registry()).unwrap());
        let writer = Arc::new(AnchorStore::open(&path, registry()).unwrap());

        let mut graph = graph_for(&writer);
        let a = graph.add_node(Architype::new("City")).unwrap();
        writer.save(&mut graph, a).unwrap();

        assert!(reader.find_by_id(a).unwrap().unwrap().ctx.is_empty());

        graph.set_field(a, "population", 9).unwrap();
        writer.save(&mut graph, a).unwrap();

        let record = reader.find_by_id(a).unwrap().unwrap();
        assert_eq!(record.ctx.get("population"), Some(&json!(9)));
        assert_eq!(reader.metrics().reads, 2);
    }

    #[test]
    fn test_own_commits_keep_cache() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(AnchorStore::open(&temp.path().join("graph.db"), registry()).unwrap());
        let mut graph = graph_for(&store);
        let a = graph.add_node(Architype::new("City")).unwrap();
        let b = graph.add_node(Architype::new("City")).unwrap();
        store.flush(&mut graph).unwrap();
        store.find_by_id(a).unwrap();

        graph.set_field(b, "population", 1).unwrap();
        store.save(&mut graph, b).unwrap();

        store.find_by_id(a).unwrap();
        assert_eq!(store.metrics().cache_hits, 1);
    }
}
