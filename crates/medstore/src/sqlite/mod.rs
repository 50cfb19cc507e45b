//! SQLite backend.
//!
//! Each collection is a table of `(key, value)` rows with the record stored
//! as JSON text. Secondary indexes are expression indexes over
//! `json_extract(value, '$.<field>')`.
//!
//! No connection outlives a call: every operation opens the file, runs the
//! upgrade step if the stored version is behind, runs one transaction and
//! closes the connection again.

pub mod migrate;

use crate::backend::{Backend, BackendKind, Connection, TransactionMode};
use crate::events::{EventBus, StoreEvent};
use crate::key::{inject_key, json_path, Key};
use crate::schema::{CollectionSchema, DatabaseSchema, IndexSchema};
use medstore_core::{StoreConfig, StoreError, StoreResult};
use rusqlite::{params, ErrorCode, OptionalExtension, TransactionBehavior};
use serde_json::Value as JsonValue;
use std::path::Path;

/// Persistent backend over a SQLite file.
pub struct SqliteBackend {
    config: StoreConfig,
    schema: DatabaseSchema,
    events: EventBus,
}

impl SqliteBackend {
    pub fn new(config: StoreConfig, schema: DatabaseSchema, events: EventBus) -> Self {
        Self {
            config,
            schema,
            events,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Synchronous capability check: the data directory is usable and the
    /// engine initialises.
    pub fn probe(config: &StoreConfig) -> bool {
        if config.validate().is_err() {
            return false;
        }
        if std::fs::create_dir_all(&config.data_dir).is_err() {
            return false;
        }
        if !dir_is_writable(&config.data_dir) {
            return false;
        }
        rusqlite::Connection::open_in_memory().is_ok()
    }

    /// Open a connection and bring the schema up to the requested version.
    fn connect(&self) -> StoreResult<rusqlite::Connection> {
        let path = self.config.database_path();
        std::fs::create_dir_all(&self.config.data_dir).map_err(|e| {
            StoreError::connection(format!(
                "Cannot create data directory {}: {}",
                self.config.data_dir.display(),
                e
            ))
        })?;

        let mut conn = rusqlite::Connection::open(&path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Database refused to open");
            StoreError::connection(format!("Failed to open {}: {}", path.display(), e))
        })?;
        conn.busy_timeout(self.config.busy_timeout())
            .map_err(|e| StoreError::connection(e.to_string()))?;

        let stored = migrate::read_version(&conn)
            .map_err(|e| StoreError::connection(format!("Failed to read version: {}", e)))?;
        let requested = self.config.version;

        if requested < stored {
            return Err(StoreError::connection(format!(
                "Requested version {} is less than current version {}",
                requested, stored
            )));
        }

        if requested > stored {
            if stored == 0 {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| StoreError::connection(e.to_string()))?;
            }

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Exclusive)
                .map_err(|e| StoreError::connection(format!("Upgrade blocked: {}", e)))?;
            // Another process may have upgraded while we waited for the lock.
            let current = migrate::read_version(&tx)
                .map_err(|e| StoreError::connection(e.to_string()))?;
            if current < requested {
                migrate::upgrade(&tx, &self.schema, current, requested)?;
            }
            tx.commit()
                .map_err(|e| StoreError::connection(format!("Upgrade failed: {}", e)))?;

            if current < requested {
                self.events.emit(StoreEvent::Upgraded {
                    database: self.config.database_name.clone(),
                    old_version: current,
                    new_version: requested,
                });
            }
        }

        Ok(conn)
    }

    /// Run `f` inside one transaction on a fresh connection.
    fn with_transaction<T, F>(
        &self,
        collection: &CollectionSchema,
        mode: TransactionMode,
        f: F,
    ) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>, &str) -> StoreResult<T>,
    {
        let mut conn = self.connect()?;
        let map = |e: rusqlite::Error| map_transaction_error(e, collection);

        let behavior = match mode {
            TransactionMode::ReadOnly => {
                conn.pragma_update(None, "query_only", true).map_err(map)?;
                TransactionBehavior::Deferred
            }
            TransactionMode::ReadWrite => TransactionBehavior::Immediate,
        };

        let table = collection.table_name();
        let result = {
            let tx = conn.transaction_with_behavior(behavior).map_err(map)?;
            let value = f(&tx, &table)?;
            tx.commit().map_err(map)?;
            value
        };

        if let Err((_, e)) = conn.close() {
            tracing::warn!(collection = collection.name, error = %e, "Failed to close connection");
        }
        Ok(result)
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn is_available(&self) -> bool {
        Self::probe(&self.config)
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = self.connect()?;
        let map = |e: rusqlite::Error| StoreError::connection(e.to_string());
        let version = migrate::read_version(&conn).map_err(map)?;
        let collections = migrate::existing_collections(&conn, &self.schema).map_err(map)?;
        let upgrades = migrate::upgrade_history(&conn).map_err(map)?;

        tracing::info!(
            database = %self.config.database_name,
            version,
            "Database opened"
        );

        Ok(Connection {
            name: self.config.database_name.clone(),
            version,
            collections,
            path: Some(self.config.database_path()),
            upgrades,
            sqlite: Some(conn),
        })
    }

    fn add(&self, collection: &CollectionSchema, value: JsonValue) -> StoreResult<JsonValue> {
        self.with_transaction(collection, TransactionMode::ReadWrite, |tx, table| {
            insert(tx, table, collection, value, false)
        })
    }

    fn put(&self, collection: &CollectionSchema, value: JsonValue) -> StoreResult<JsonValue> {
        self.with_transaction(collection, TransactionMode::ReadWrite, |tx, table| {
            insert(tx, table, collection, value, true)
        })
    }

    fn get(&self, collection: &CollectionSchema, key: &Key) -> StoreResult<Option<JsonValue>> {
        self.with_transaction(collection, TransactionMode::ReadOnly, |tx, table| {
            let raw: Option<String> = tx
                .query_row(
                    &format!("SELECT value FROM \"{}\" WHERE key = ?1", table),
                    [key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| map_transaction_error(e, collection))?;
            raw.map(|r| decode(&r)).transpose()
        })
    }

    fn get_all(&self, collection: &CollectionSchema) -> StoreResult<Vec<JsonValue>> {
        self.with_transaction(collection, TransactionMode::ReadOnly, |tx, table| {
            let sql = format!("SELECT value FROM \"{}\" ORDER BY key", table);
            query_values(tx, &sql, [], collection)
        })
    }

    fn get_all_keys(&self, collection: &CollectionSchema) -> StoreResult<Vec<Key>> {
        self.with_transaction(collection, TransactionMode::ReadOnly, |tx, table| {
            let map = |e: rusqlite::Error| map_transaction_error(e, collection);
            let mut stmt = tx
                .prepare(&format!("SELECT key FROM \"{}\" ORDER BY key", table))
                .map_err(map)?;
            let keys = stmt
                .query_map([], |row| row.get::<_, Key>(0))
                .map_err(map)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map)?;
            Ok(keys)
        })
    }

    fn get_by_index(
        &self,
        collection: &CollectionSchema,
        index: &IndexSchema,
        value: &Key,
    ) -> StoreResult<Vec<JsonValue>> {
        self.with_transaction(collection, TransactionMode::ReadOnly, |tx, table| {
            let path = json_path(index.key_path);
            // The json_extract term must match the index expression verbatim.
            let sql = format!(
                "SELECT value FROM \"{table}\" \
                 WHERE json_extract(value, '{path}') = ?1 \
                 AND json_type(value, '{path}') IN ('text', 'integer') \
                 ORDER BY key"
            );
            query_values(tx, &sql, [value], collection)
        })
    }

    fn delete(&self, collection: &CollectionSchema, key: &Key) -> StoreResult<bool> {
        self.with_transaction(collection, TransactionMode::ReadWrite, |tx, table| {
            let changed = tx
                .execute(&format!("DELETE FROM \"{}\" WHERE key = ?1", table), [key])
                .map_err(|e| map_transaction_error(e, collection))?;
            Ok(changed > 0)
        })
    }

    fn clear(&self, collection: &CollectionSchema) -> StoreResult<u64> {
        self.with_transaction(collection, TransactionMode::ReadWrite, |tx, table| {
            let changed = tx
                .execute(&format!("DELETE FROM \"{}\"", table), [])
                .map_err(|e| map_transaction_error(e, collection))?;
            Ok(changed as u64)
        })
    }

    fn count(&self, collection: &CollectionSchema) -> StoreResult<u64> {
        self.with_transaction(collection, TransactionMode::ReadOnly, |tx, table| {
            let count: i64 = tx
                .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
                    row.get(0)
                })
                .map_err(|e| map_transaction_error(e, collection))?;
            Ok(count as u64)
        })
    }

    fn delete_database(&self) -> StoreResult<()> {
        let path = self.config.database_path();
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        tracing::info!(path = %path.display(), "Database deleted");
        Ok(())
    }
}

// ==================== Helpers ====================

/// Insert a record, replacing an existing one when `replace` is set.
fn insert(
    tx: &rusqlite::Transaction<'_>,
    table: &str,
    collection: &CollectionSchema,
    mut value: JsonValue,
    replace: bool,
) -> StoreResult<JsonValue> {
    let map = |e: rusqlite::Error| map_transaction_error(e, collection);
    let key = collection.resolve_key(&value)?;

    let key = match key {
        Some(key) => {
            let sql = if replace {
                format!(
                    "INSERT INTO \"{}\" (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    table
                )
            } else {
                format!("INSERT INTO \"{}\" (key, value) VALUES (?1, ?2)", table)
            };
            tx.execute(&sql, params![key, encode(&value)?])
                .map_err(|e| match e.sqlite_error_code() {
                    Some(ErrorCode::ConstraintViolation) => StoreError::constraint(format!(
                        "Key already exists: {} in {}",
                        key, collection.name
                    )),
                    _ => map(e),
                })?;
            key
        }
        None => {
            // Auto-increment: let SQLite pick the key, then write it back.
            tx.execute(
                &format!("INSERT INTO \"{}\" (value) VALUES (?1)", table),
                [encode(&value)?],
            )
            .map_err(map)?;
            let key = Key::Int(tx.last_insert_rowid());
            inject_key(&mut value, collection.key_path, &key)?;
            tx.execute(
                &format!("UPDATE \"{}\" SET value = ?1 WHERE key = ?2", table),
                params![encode(&value)?, key],
            )
            .map_err(map)?;
            key
        }
    };

    tracing::debug!(collection = collection.name, %key, replace, "Record written");
    Ok(value)
}

fn query_values<P: rusqlite::Params>(
    tx: &rusqlite::Transaction<'_>,
    sql: &str,
    params: P,
    collection: &CollectionSchema,
) -> StoreResult<Vec<JsonValue>> {
    let map = |e: rusqlite::Error| map_transaction_error(e, collection);
    let mut stmt = tx.prepare(sql).map_err(map)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(map)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map)?;
    rows.iter().map(|raw| decode(raw)).collect()
}

fn encode(value: &JsonValue) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::data(e.to_string()))
}

fn decode(raw: &str) -> StoreResult<JsonValue> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::transaction(format!("Corrupt record: {}", e)))
}

fn map_transaction_error(err: rusqlite::Error, collection: &CollectionSchema) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => {
            StoreError::constraint(format!("{} in {}", err, collection.name))
        }
        _ => StoreError::transaction(format!("{} failed: {}", collection.name, err)),
    }
}

fn dir_is_writable(dir: &Path) -> bool {
    let probe = dir.join(".medstore-probe");
    let writable = std::fs::write(&probe, b"").is_ok();
    let _ = std::fs::remove_file(&probe);
    writable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MEDICAL_RECORDS, MEDICAL_SCHEMA, OFFLINE_ACTIONS, PATIENTS};
    use serde_json::json;
    use tempfile::tempdir;

    fn backend(dir: &Path) -> SqliteBackend {
        SqliteBackend::new(
            StoreConfig::default().with_data_dir(dir),
            MEDICAL_SCHEMA,
            EventBus::new(),
        )
    }

    fn collection(name: &str) -> &'static CollectionSchema {
        MEDICAL_SCHEMA.collection(name).unwrap()
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let conn = backend.open().unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.contains_collection(PATIENTS));
        assert!(conn.contains_collection(OFFLINE_ACTIONS));
        assert_eq!(conn.upgrade_history().len(), 1);
        conn.close();

        // A second open does not run the upgrade again.
        let conn = backend.open().unwrap();
        assert_eq!(conn.upgrade_history().len(), 1);
    }

    #[test]
    fn test_lower_version_is_refused() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::default().with_data_dir(dir.path()).with_version(2);
        SqliteBackend::new(config.clone(), MEDICAL_SCHEMA, EventBus::new())
            .open()
            .unwrap();

        let older = SqliteBackend::new(config.with_version(1), MEDICAL_SCHEMA, EventBus::new());
        assert!(matches!(older.open(), Err(StoreError::Connection(_))));
    }

    #[test]
    fn test_add_duplicate_is_constraint_error() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let patients = collection(PATIENTS);

        backend.add(patients, json!({"id": "p1", "name": "Ada"})).unwrap();
        let err = backend
            .add(patients, json!({"id": "p1", "name": "Other"}))
            .unwrap_err();

        assert!(matches!(err, StoreError::Constraint(_)));
        let stored = backend.get(patients, &Key::from("p1")).unwrap().unwrap();
        assert_eq!(stored["name"], "Ada");
        assert_eq!(backend.count(patients).unwrap(), 1);
    }

    #[test]
    fn test_auto_increment_injects_key() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let actions = collection(OFFLINE_ACTIONS);

        let first = backend.add(actions, json!({"status": "pending"})).unwrap();
        let second = backend.add(actions, json!({"status": "pending"})).unwrap();

        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);
        let stored = backend.get(actions, &Key::Int(2)).unwrap().unwrap();
        assert_eq!(stored, second);

        let err = backend
            .add(actions, json!({"id": "a", "status": "pending"}))
            .unwrap_err();
        assert!(matches!(err, StoreError::Data(_)));
    }

    #[test]
    fn test_index_ignores_non_key_values() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let records = collection(MEDICAL_RECORDS);
        let by_patient = records.index("patientId").unwrap();

        backend.add(records, json!({"id": "m1", "patientId": "p1"})).unwrap();
        backend
            .add(records, json!({"id": "m2", "patientId": ["p1"]}))
            .unwrap();
        backend.add(records, json!({"id": "m3"})).unwrap();

        let found = backend
            .get_by_index(records, by_patient, &Key::from("p1"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "m1");
        assert!(backend
            .get_by_index(records, by_patient, &Key::from("[\"p1\"]"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_records_must_have_keys() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let patients = collection(PATIENTS);

        assert!(matches!(
            backend.add(patients, json!({"name": "no id"})),
            Err(StoreError::Data(_))
        ));
        assert!(matches!(
            backend.put(patients, json!(["not", "an", "object"])),
            Err(StoreError::Data(_))
        ));
    }

    #[test]
    fn test_delete_database() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        backend.add(collection(PATIENTS), json!({"id": "p1"})).unwrap();
        assert!(backend.config().database_path().exists());

        backend.delete_database().unwrap();
        assert!(!backend.config().database_path().exists());
        // Deleting again is fine.
        backend.delete_database().unwrap();
        assert_eq!(backend.count(collection(PATIENTS)).unwrap(), 0);
    }

    #[test]
    fn test_probe() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::default().with_data_dir(dir.path().join("nested"));
        assert!(SqliteBackend::probe(&config));

        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let config = StoreConfig::default().with_data_dir(blocker.join("sub"));
        assert!(!SqliteBackend::probe(&config));
    }
}
