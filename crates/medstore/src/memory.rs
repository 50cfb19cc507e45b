//! In-memory backend.
//!
//! The non-persistent fallback for environments where the SQLite backend is
//! unavailable. Same contract, nothing survives the process.

use crate::backend::{Backend, BackendKind, Connection};
use crate::events::{EventBus, StoreEvent};
use crate::key::{inject_key, Key};
use crate::schema::{CollectionSchema, DatabaseSchema, IndexSchema};
use hashbrown::HashMap;
use medstore_core::{StoreError, StoreResult};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub(crate) const MEMORY_DATABASE_NAME: &str = "memory";

// ==================== Index ====================

/// Secondary index: index value -> primary keys.
#[derive(Debug, Default)]
struct MemoryIndex {
    entries: HashMap<Key, Vec<Key>>,
}

impl MemoryIndex {
    fn add_entry(&mut self, index_key: Key, primary_key: &Key) {
        self.entries
            .entry(index_key)
            .or_default()
            .push(primary_key.clone());
    }

    fn delete_entry(&mut self, index_key: &Key, primary_key: &Key) {
        if let Some(keys) = self.entries.get_mut(index_key) {
            keys.retain(|k| k != primary_key);
            if keys.is_empty() {
                self.entries.remove(index_key);
            }
        }
    }

    fn get(&self, index_key: &Key) -> &[Key] {
        self.entries
            .get(index_key)
            .map(|keys| keys.as_slice())
            .unwrap_or(&[])
    }
}

// ==================== Collection ====================

#[derive(Debug)]
struct MemoryCollection {
    schema: CollectionSchema,
    records: BTreeMap<Key, JsonValue>,
    indexes: HashMap<&'static str, MemoryIndex>,
    /// Next generated key. Never reused, even after `clear`. `None` once
    /// the key space is used up.
    next_key: Option<i64>,
}

impl MemoryCollection {
    fn new(schema: CollectionSchema) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|index| (index.name, MemoryIndex::default()))
            .collect();
        Self {
            schema,
            records: BTreeMap::new(),
            indexes,
            next_key: Some(1),
        }
    }

    fn insert(&mut self, mut value: JsonValue, replace: bool) -> StoreResult<JsonValue> {
        let key = match self.schema.resolve_key(&value)? {
            Some(key) => {
                if self.records.contains_key(&key) {
                    if !replace {
                        return Err(StoreError::constraint(format!(
                            "Key already exists: {} in {}",
                            key, self.schema.name
                        )));
                    }
                    self.remove_from_indexes(&key);
                }
                if let (Key::Int(i), Some(next)) = (&key, self.next_key) {
                    if self.schema.auto_increment && *i >= next {
                        self.next_key = i.checked_add(1);
                    }
                }
                key
            }
            None => {
                let key = self.generate_key()?;
                inject_key(&mut value, self.schema.key_path, &key)?;
                key
            }
        };

        self.add_to_indexes(&key, &value);
        self.records.insert(key, value.clone());
        Ok(value)
    }

    /// Take the next auto-increment key. Fails instead of wrapping.
    fn generate_key(&mut self) -> StoreResult<Key> {
        let next = self.next_key.ok_or_else(|| {
            StoreError::transaction(format!("Key generator exhausted in {}", self.schema.name))
        })?;
        let key = Key::Int(next);
        if self.records.contains_key(&key) {
            return Err(StoreError::constraint(format!(
                "Key already exists: {} in {}",
                key, self.schema.name
            )));
        }
        self.next_key = next.checked_add(1);
        Ok(key)
    }

    fn delete(&mut self, key: &Key) -> bool {
        self.remove_from_indexes(key);
        self.records.remove(key).is_some()
    }

    fn clear(&mut self) -> u64 {
        let removed = self.records.len() as u64;
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
        removed
    }

    fn get_by_index(&self, index: &IndexSchema, value: &Key) -> Vec<JsonValue> {
        let Some(entries) = self.indexes.get(index.name) else {
            return Vec::new();
        };
        let mut keys = entries.get(value).to_vec();
        keys.sort();
        keys.iter()
            .filter_map(|k| self.records.get(k).cloned())
            .collect()
    }

    fn add_to_indexes(&mut self, primary_key: &Key, value: &JsonValue) {
        for index in self.schema.indexes {
            if let Some(index_key) = index_key(value, index) {
                if let Some(entries) = self.indexes.get_mut(index.name) {
                    entries.add_entry(index_key, primary_key);
                }
            }
        }
    }

    fn remove_from_indexes(&mut self, primary_key: &Key) {
        let Some(record) = self.records.get(primary_key) else {
            return;
        };
        for index in self.schema.indexes {
            if let Some(index_key) = index_key(record, index) {
                if let Some(entries) = self.indexes.get_mut(index.name) {
                    entries.delete_entry(&index_key, primary_key);
                }
            }
        }
    }
}

/// Only string and integer fields are indexed; anything else is skipped.
fn index_key(value: &JsonValue, index: &IndexSchema) -> Option<Key> {
    crate::key::extract(value, index.key_path).and_then(Key::try_from_json)
}

// ==================== Database ====================

#[derive(Debug, Default)]
struct MemoryDatabase {
    version: u32,
    collections: HashMap<&'static str, MemoryCollection>,
}

/// Process-local backend over hashbrown maps.
pub struct MemoryBackend {
    schema: DatabaseSchema,
    version: u32,
    events: EventBus,
    state: Mutex<MemoryDatabase>,
}

impl MemoryBackend {
    pub fn new(schema: DatabaseSchema, version: u32, events: EventBus) -> Self {
        Self {
            schema,
            version,
            events,
            state: Mutex::new(MemoryDatabase::default()),
        }
    }

    /// Lock the database, running the upgrade step on first use.
    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryDatabase>> {
        let mut db = self
            .state
            .lock()
            .map_err(|_| StoreError::transaction("Memory store poisoned"))?;

        if db.version < self.version {
            let old_version = db.version;
            for collection in self.schema.collections {
                db.collections
                    .entry(collection.name)
                    .or_insert_with(|| MemoryCollection::new(*collection));
            }
            db.version = self.version;
            tracing::debug!(old_version, new_version = self.version, "Memory store upgraded");
            self.events.emit(StoreEvent::Upgraded {
                database: MEMORY_DATABASE_NAME.to_string(),
                old_version,
                new_version: self.version,
            });
        }
        Ok(db)
    }

    fn with_collection<T>(
        &self,
        collection: &CollectionSchema,
        f: impl FnOnce(&mut MemoryCollection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut db = self.lock()?;
        let store = db.collections.get_mut(collection.name).ok_or_else(|| {
            StoreError::transaction(format!("No collection {} in memory store", collection.name))
        })?;
        f(store)
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn is_available(&self) -> bool {
        true
    }

    fn open(&self) -> StoreResult<Connection> {
        let db = self.lock()?;
        let collections = self
            .schema
            .collections
            .iter()
            .filter(|c| db.collections.contains_key(c.name))
            .map(|c| c.name.to_string())
            .collect();
        Ok(Connection {
            name: MEMORY_DATABASE_NAME.to_string(),
            version: db.version,
            collections,
            path: None,
            upgrades: Vec::new(),
            sqlite: None,
        })
    }

    fn add(&self, collection: &CollectionSchema, value: JsonValue) -> StoreResult<JsonValue> {
        self.with_collection(collection, |store| store.insert(value, false))
    }

    fn put(&self, collection: &CollectionSchema, value: JsonValue) -> StoreResult<JsonValue> {
        self.with_collection(collection, |store| store.insert(value, true))
    }

    fn get(&self, collection: &CollectionSchema, key: &Key) -> StoreResult<Option<JsonValue>> {
        self.with_collection(collection, |store| Ok(store.records.get(key).cloned()))
    }

    fn get_all(&self, collection: &CollectionSchema) -> StoreResult<Vec<JsonValue>> {
        self.with_collection(collection, |store| {
            Ok(store.records.values().cloned().collect())
        })
    }

    fn get_all_keys(&self, collection: &CollectionSchema) -> StoreResult<Vec<Key>> {
        self.with_collection(collection, |store| Ok(store.records.keys().cloned().collect()))
    }

    fn get_by_index(
        &self,
        collection: &CollectionSchema,
        index: &IndexSchema,
        value: &Key,
    ) -> StoreResult<Vec<JsonValue>> {
        self.with_collection(collection, |store| Ok(store.get_by_index(index, value)))
    }

    fn delete(&self, collection: &CollectionSchema, key: &Key) -> StoreResult<bool> {
        self.with_collection(collection, |store| Ok(store.delete(key)))
    }

    fn clear(&self, collection: &CollectionSchema) -> StoreResult<u64> {
        self.with_collection(collection, |store| Ok(store.clear()))
    }

    fn count(&self, collection: &CollectionSchema) -> StoreResult<u64> {
        self.with_collection(collection, |store| Ok(store.records.len() as u64))
    }

    fn delete_database(&self) -> StoreResult<()> {
        let mut db = self
            .state
            .lock()
            .map_err(|_| StoreError::transaction("Memory store poisoned"))?;
        *db = MemoryDatabase::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MEDICAL_IMAGES, MEDICAL_SCHEMA, OFFLINE_ACTIONS, PATIENTS};
    use serde_json::json;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(MEDICAL_SCHEMA, 1, EventBus::new())
    }

    fn collection(name: &str) -> &'static CollectionSchema {
        MEDICAL_SCHEMA.collection(name).unwrap()
    }

    #[test]
    fn test_open_runs_upgrade_once() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let backend = MemoryBackend::new(MEDICAL_SCHEMA, 1, events);

        let conn = backend.open().unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.contains_collection(PATIENTS));
        assert!(conn.path().is_none());
        backend.open().unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(StoreEvent::Upgraded { old_version: 0, new_version: 1, .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_put_reindexes() {
        let backend = backend();
        let images = collection(MEDICAL_IMAGES);
        let by_patient = images.index("patientId").unwrap();

        backend
            .add(images, json!({"id": "i1", "recordId": "m1", "patientId": "p1"}))
            .unwrap();
        backend
            .put(images, json!({"id": "i1", "recordId": "m1", "patientId": "p2"}))
            .unwrap();

        assert!(backend
            .get_by_index(images, by_patient, &Key::from("p1"))
            .unwrap()
            .is_empty());
        assert_eq!(
            backend
                .get_by_index(images, by_patient, &Key::from("p2"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_delete_cleans_index() {
        let backend = backend();
        let images = collection(MEDICAL_IMAGES);
        let by_record = images.index("recordId").unwrap();

        backend
            .add(images, json!({"id": "i1", "recordId": "m1", "patientId": "p1"}))
            .unwrap();
        assert!(backend.delete(images, &Key::from("i1")).unwrap());
        assert!(!backend.delete(images, &Key::from("i1")).unwrap());
        assert!(backend
            .get_by_index(images, by_record, &Key::from("m1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_auto_increment_never_reuses_keys() {
        let backend = backend();
        let actions = collection(OFFLINE_ACTIONS);

        let a = backend.add(actions, json!({"status": "pending"})).unwrap();
        assert_eq!(a["id"], 1);
        let explicit = backend
            .add(actions, json!({"id": 10, "status": "pending"}))
            .unwrap();
        assert_eq!(explicit["id"], 10);
        backend.clear(actions).unwrap();

        let b = backend.add(actions, json!({"status": "pending"})).unwrap();
        assert_eq!(b["id"], 11);
    }

    #[test]
    fn test_exhausted_key_generator_errors_and_stays_usable() {
        let backend = backend();
        let actions = collection(OFFLINE_ACTIONS);

        backend
            .add(actions, json!({"id": i64::MAX, "status": "pending"}))
            .unwrap();
        let err = backend.add(actions, json!({"status": "pending"})).unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)), "got {:?}", err);

        assert_eq!(backend.count(actions).unwrap(), 1);
        let kept = backend.get(actions, &Key::Int(i64::MAX)).unwrap().unwrap();
        assert_eq!(kept["status"], "pending");
        backend
            .add(actions, json!({"id": 5, "status": "synced"}))
            .unwrap();
        assert_eq!(backend.count(actions).unwrap(), 2);
    }

    #[test]
    fn test_delete_database_resets() {
        let backend = backend();
        let patients = collection(PATIENTS);
        backend.add(patients, json!({"id": "p1"})).unwrap();

        backend.delete_database().unwrap();

        assert_eq!(backend.count(patients).unwrap(), 0);
        assert_eq!(backend.open().unwrap().version(), 1);
    }
}
