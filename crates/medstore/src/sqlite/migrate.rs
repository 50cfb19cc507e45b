//! Versioned schema upgrade for the SQLite backend.
//!
//! The stored version lives in `PRAGMA user_version`; every applied upgrade
//! is also appended to `schema_version` for inspection.

use crate::backend::UpgradeRecord;
use crate::key::json_path;
use crate::schema::{CollectionSchema, DatabaseSchema};
use chrono::Utc;
use medstore_core::{StoreError, StoreResult};
use rusqlite::{params, Connection};

/// Read the stored schema version. A fresh database reports 0.
pub fn read_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))
}

/// Check whether a collection table exists
pub fn collection_exists(
    conn: &Connection,
    collection: &CollectionSchema,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [collection.table_name()],
        |row| row.get::<_, i64>(0).map(|count| count > 0),
    )
}

/// Names of the collections present in the database.
pub fn existing_collections(
    conn: &Connection,
    schema: &DatabaseSchema,
) -> rusqlite::Result<Vec<String>> {
    let mut names = Vec::new();
    for collection in schema.collections {
        if collection_exists(conn, collection)? {
            names.push(collection.name.to_string());
        }
    }
    Ok(names)
}

/// Upgrade steps recorded so far. Empty for a database never upgraded.
pub fn upgrade_history(conn: &Connection) -> rusqlite::Result<Vec<UpgradeRecord>> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |row| row.get::<_, i64>(0).map(|count| count > 0),
    )?;
    if !table_exists {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare("SELECT version, applied_at FROM schema_version ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(UpgradeRecord {
            version: row.get(0)?,
            applied_at: row.get(1)?,
        })
    })?;
    rows.collect()
}

/// Run the upgrade step from `from_version` to `to_version`.
///
/// Must be called inside a write transaction. Creating collections and
/// indexes is idempotent, so a partially upgraded database converges.
pub fn upgrade(
    conn: &Connection,
    schema: &DatabaseSchema,
    from_version: u32,
    to_version: u32,
) -> StoreResult<()> {
    let map = |e: rusqlite::Error| StoreError::connection(format!("Upgrade failed: {}", e));

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );
        "#,
    )
    .map_err(map)?;

    for collection in schema.collections {
        if !collection_exists(conn, collection).map_err(map)? {
            create_collection(conn, collection).map_err(map)?;
            tracing::debug!(collection = collection.name, "Created collection");
        }
        create_indexes(conn, collection).map_err(map)?;
    }

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![to_version, Utc::now().timestamp()],
    )
    .map_err(map)?;
    conn.pragma_update(None, "user_version", to_version)
        .map_err(map)?;

    tracing::info!(from_version, to_version, "Schema upgraded");
    Ok(())
}

fn create_collection(conn: &Connection, collection: &CollectionSchema) -> rusqlite::Result<()> {
    let key_column = if collection.auto_increment {
        "key INTEGER PRIMARY KEY AUTOINCREMENT"
    } else {
        "key NOT NULL PRIMARY KEY"
    };
    conn.execute_batch(&format!(
        "CREATE TABLE \"{}\" ({}, value TEXT NOT NULL);",
        collection.table_name(),
        key_column
    ))
}

fn create_indexes(conn: &Connection, collection: &CollectionSchema) -> rusqlite::Result<()> {
    for index in collection.indexes {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" (json_extract(value, '{}'));",
            collection.index_table_name(index),
            collection.table_name(),
            json_path(index.key_path)
        ))?;
    }
    Ok(())
}
