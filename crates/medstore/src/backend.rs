//! Storage backend seam.
//!
//! Backends are synchronous and work on JSON records; `LocalStore` moves
//! each call onto the blocking pool and adds the typed layer on top.

use crate::key::Key;
use crate::schema::{CollectionSchema, IndexSchema};
use medstore_core::StoreResult;
use serde_json::Value as JsonValue;
use std::path::PathBuf;

/// Transaction mode. One operation never mixes modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Which engine a store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Memory,
}

impl BackendKind {
    pub fn is_persistent(self) -> bool {
        matches!(self, BackendKind::Sqlite)
    }
}

/// A record collection engine.
///
/// Every call is its own unit of work: it opens what it needs, runs one
/// transaction and releases everything before returning.
pub trait Backend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Whether the engine can be used at all in this environment.
    fn is_available(&self) -> bool;

    /// Open the database, running the upgrade step when needed.
    fn open(&self) -> StoreResult<Connection>;

    /// Insert a new record. Fails with `Constraint` if the key exists.
    fn add(&self, collection: &CollectionSchema, value: JsonValue) -> StoreResult<JsonValue>;

    /// Insert or fully replace a record.
    fn put(&self, collection: &CollectionSchema, value: JsonValue) -> StoreResult<JsonValue>;

    fn get(&self, collection: &CollectionSchema, key: &Key) -> StoreResult<Option<JsonValue>>;

    /// All records in key order.
    fn get_all(&self, collection: &CollectionSchema) -> StoreResult<Vec<JsonValue>>;

    fn get_all_keys(&self, collection: &CollectionSchema) -> StoreResult<Vec<Key>>;

    /// Records whose indexed field equals `value`, in primary key order.
    fn get_by_index(
        &self,
        collection: &CollectionSchema,
        index: &IndexSchema,
        value: &Key,
    ) -> StoreResult<Vec<JsonValue>>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, collection: &CollectionSchema, key: &Key) -> StoreResult<bool>;

    /// Remove every record. Returns how many were removed.
    fn clear(&self, collection: &CollectionSchema) -> StoreResult<u64>;

    fn count(&self, collection: &CollectionSchema) -> StoreResult<u64>;

    /// Drop the whole database. A missing database is not an error.
    fn delete_database(&self) -> StoreResult<()>;
}

/// One upgrade step recorded in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRecord {
    pub version: u32,
    /// Unix seconds.
    pub applied_at: i64,
}

/// A live connection returned by `LocalStore::open`. Dropping it closes it.
#[derive(Debug)]
pub struct Connection {
    pub(crate) name: String,
    pub(crate) version: u32,
    pub(crate) collections: Vec<String>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) upgrades: Vec<UpgradeRecord>,
    pub(crate) sqlite: Option<rusqlite::Connection>,
}

impl Connection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored schema version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Collections present in the database.
    pub fn collection_names(&self) -> &[String] {
        &self.collections
    }

    pub fn contains_collection(&self, name: &str) -> bool {
        self.collections.iter().any(|c| c == name)
    }

    /// Database file, for persistent backends.
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// Upgrade steps applied so far, oldest first.
    pub fn upgrade_history(&self) -> &[UpgradeRecord] {
        &self.upgrades
    }

    pub fn close(self) {
        if let Some(conn) = self.sqlite {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(database = %self.name, error = %e, "Failed to close connection");
            }
        }
    }
}
