//! Async facade over a backend.

use crate::backend::{Backend, BackendKind, Connection};
use crate::events::{EventBus, StoreEvent};
use crate::key::Key;
use crate::memory::MemoryBackend;
use crate::records::{IndexField, Record};
use crate::schema::{CollectionSchema, DatabaseSchema, MEDICAL_SCHEMA};
use crate::sqlite::SqliteBackend;
use medstore_core::{StoreConfig, StoreError, StoreResult};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The local structured store.
///
/// Holds no connection. Every call opens one, runs a single transaction on
/// tokio's blocking pool and closes it again. Cloning is cheap and clones
/// share the same event channel.
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn Backend>,
    database: String,
    schema: DatabaseSchema,
    events: EventBus,
}

impl LocalStore {
    /// Store over the SQLite file described by `config`, medical schema.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        Self::with_schema(config, MEDICAL_SCHEMA)
    }

    pub fn with_schema(config: StoreConfig, schema: DatabaseSchema) -> StoreResult<Self> {
        config.validate()?;
        schema.validate()?;
        let events = EventBus::new();
        let database = config.database_name.clone();
        let backend = SqliteBackend::new(config, schema, events.clone());
        Ok(Self {
            backend: Arc::new(backend),
            database,
            schema,
            events,
        })
    }

    /// Non-persistent store with the medical schema.
    pub fn in_memory() -> Self {
        Self::in_memory_with_schema(MEDICAL_SCHEMA, medstore_core::config::DEFAULT_VERSION)
    }

    pub fn in_memory_with_schema(schema: DatabaseSchema, version: u32) -> Self {
        let events = EventBus::new();
        let backend = MemoryBackend::new(schema, version, events.clone());
        Self {
            backend: Arc::new(backend),
            database: crate::memory::MEMORY_DATABASE_NAME.to_string(),
            schema,
            events,
        }
    }

    /// SQLite when the environment supports it, memory otherwise.
    pub fn open_or_fallback(config: StoreConfig) -> StoreResult<Self> {
        if SqliteBackend::probe(&config) {
            Self::new(config)
        } else {
            tracing::warn!(
                data_dir = %config.data_dir.display(),
                "Persistent storage unavailable, using in-memory store"
            );
            Ok(Self::in_memory_with_schema(MEDICAL_SCHEMA, config.version))
        }
    }

    /// Synchronous capability check. When false, use a fallback store
    /// instead of calling any other operation.
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Open a connection, running the upgrade step when needed.
    pub async fn open(&self) -> StoreResult<Connection> {
        self.run(|backend| backend.open()).await
    }

    /// Delete the whole database.
    pub async fn delete_database(&self) -> StoreResult<()> {
        self.run(|backend| backend.delete_database()).await?;
        self.events.emit(StoreEvent::Deleted {
            database: self.database.clone(),
        });
        Ok(())
    }

    // ==================== Typed operations ====================

    /// Insert a new record. `Constraint` if its key already exists.
    pub async fn add<R: Record>(&self, record: &R) -> StoreResult<R> {
        let value = self.add_raw(R::COLLECTION, to_json(record)?).await?;
        from_json(value)
    }

    /// Insert or fully replace a record.
    pub async fn update<R: Record>(&self, record: &R) -> StoreResult<R> {
        let value = self.update_raw(R::COLLECTION, to_json(record)?).await?;
        from_json(value)
    }

    pub async fn get<R: Record>(&self, key: impl Into<Key>) -> StoreResult<Option<R>> {
        self.get_raw(R::COLLECTION, key.into())
            .await?
            .map(from_json)
            .transpose()
    }

    pub async fn get_all<R: Record>(&self) -> StoreResult<Vec<R>> {
        self.get_all_raw(R::COLLECTION)
            .await?
            .into_iter()
            .map(from_json)
            .collect()
    }

    pub async fn get_all_keys<R: Record>(&self) -> StoreResult<Vec<Key>> {
        self.get_all_keys_raw(R::COLLECTION).await
    }

    /// Records whose indexed field equals `value`. Empty when none match.
    pub async fn get_by_index<R: Record>(
        &self,
        index: R::Index,
        value: impl Into<Key>,
    ) -> StoreResult<Vec<R>> {
        self.get_by_index_raw(R::COLLECTION, index.name(), value.into())
            .await?
            .into_iter()
            .map(from_json)
            .collect()
    }

    /// Remove a record. Removing an absent key is not an error.
    pub async fn remove<R: Record>(&self, key: impl Into<Key>) -> StoreResult<bool> {
        self.remove_raw(R::COLLECTION, key.into()).await
    }

    pub async fn clear<R: Record>(&self) -> StoreResult<u64> {
        self.clear_raw(R::COLLECTION).await
    }

    pub async fn count<R: Record>(&self) -> StoreResult<u64> {
        self.count_raw(R::COLLECTION).await
    }

    // ==================== JSON operations ====================

    pub async fn add_raw(&self, collection: &str, value: JsonValue) -> StoreResult<JsonValue> {
        let schema = self.collection(collection)?;
        let stored = self.run(move |backend| backend.add(schema, value)).await?;
        self.emit_changed(schema, &stored);
        Ok(stored)
    }

    pub async fn update_raw(&self, collection: &str, value: JsonValue) -> StoreResult<JsonValue> {
        let schema = self.collection(collection)?;
        let stored = self.run(move |backend| backend.put(schema, value)).await?;
        self.emit_changed(schema, &stored);
        Ok(stored)
    }

    pub async fn get_raw(&self, collection: &str, key: Key) -> StoreResult<Option<JsonValue>> {
        let schema = self.collection(collection)?;
        tracing::debug!(collection, %key, "get");
        self.run(move |backend| backend.get(schema, &key)).await
    }

    pub async fn get_all_raw(&self, collection: &str) -> StoreResult<Vec<JsonValue>> {
        let schema = self.collection(collection)?;
        self.run(move |backend| backend.get_all(schema)).await
    }

    pub async fn get_all_keys_raw(&self, collection: &str) -> StoreResult<Vec<Key>> {
        let schema = self.collection(collection)?;
        self.run(move |backend| backend.get_all_keys(schema)).await
    }

    pub async fn get_by_index_raw(
        &self,
        collection: &str,
        index: &str,
        value: Key,
    ) -> StoreResult<Vec<JsonValue>> {
        let schema = self.collection(collection)?;
        let index = schema.index(index)?;
        tracing::debug!(collection, index = index.name, %value, "get_by_index");
        self.run(move |backend| backend.get_by_index(schema, index, &value))
            .await
    }

    pub async fn remove_raw(&self, collection: &str, key: Key) -> StoreResult<bool> {
        let schema = self.collection(collection)?;
        let target = key.clone();
        let existed = self.run(move |backend| backend.delete(schema, &target)).await?;
        tracing::debug!(collection, %key, existed, "remove");
        if existed {
            self.events.emit(StoreEvent::Removed {
                collection: schema.name.to_string(),
                key,
            });
        }
        Ok(existed)
    }

    pub async fn clear_raw(&self, collection: &str) -> StoreResult<u64> {
        let schema = self.collection(collection)?;
        let removed = self.run(move |backend| backend.clear(schema)).await?;
        tracing::debug!(collection, removed, "clear");
        self.events.emit(StoreEvent::Cleared {
            collection: schema.name.to_string(),
        });
        Ok(removed)
    }

    pub async fn count_raw(&self, collection: &str) -> StoreResult<u64> {
        let schema = self.collection(collection)?;
        self.run(move |backend| backend.count(schema)).await
    }

    // ==================== Helpers ====================

    fn collection(&self, name: &str) -> StoreResult<&'static CollectionSchema> {
        self.schema.collection(name)
    }

    fn emit_changed(&self, schema: &CollectionSchema, stored: &JsonValue) {
        if let Ok(Some(key)) = crate::key::extract_key(stored, schema.key_path) {
            tracing::debug!(collection = schema.name, %key, "Record changed");
            self.events.emit(StoreEvent::Changed {
                collection: schema.name.to_string(),
                key,
            });
        }
    }

    /// Run a backend call on the blocking pool.
    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Backend) -> StoreResult<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| StoreError::transaction(format!("Store task failed: {}", e)))?
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("database", &self.database)
            .field("kind", &self.backend.kind())
            .field("collections", &self.schema.collection_names())
            .finish()
    }
}

fn to_json<R: Record>(record: &R) -> StoreResult<JsonValue> {
    serde_json::to_value(record)
        .map_err(|e| StoreError::data(format!("Cannot encode {} record: {}", R::COLLECTION, e)))
}

fn from_json<R: Record>(value: JsonValue) -> StoreResult<R> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::data(format!("Cannot decode {} record: {}", R::COLLECTION, e)))
}
