//! Primary keys, index values and key paths.

use medstore_core::{StoreError, StoreResult};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A primary key or secondary index value.
///
/// Integers sort before strings, matching SQLite's ordering of the key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Convert a JSON value into a key. Only integers and strings are keys.
    pub fn from_json(value: &JsonValue) -> StoreResult<Self> {
        Self::try_from_json(value)
            .ok_or_else(|| StoreError::data(format!("Not a valid key: {}", value)))
    }

    pub(crate) fn try_from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Key::Text(s.clone())),
            JsonValue::Number(n) => n.as_i64().map(Key::Int),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Key::Int(i) => JsonValue::from(*i),
            Key::Text(s) => JsonValue::from(s.as_str()),
        }
    }

    /// Parse a key typed on a command line. Text keys are taken verbatim,
    /// so "1001" stays text unless `integer` is set.
    pub fn parse(raw: &str, integer: bool) -> StoreResult<Self> {
        if !integer {
            return Ok(Key::Text(raw.to_string()));
        }
        raw.parse::<i64>()
            .map(Key::Int)
            .map_err(|_| StoreError::data(format!("Expected an integer key, got {:?}", raw)))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value.into())
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Int(value.into())
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Text(value.clone())
    }
}

impl ToSql for Key {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Key::Int(i) => ToSqlOutput::from(*i),
            Key::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for Key {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Key::Int(i)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Key::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

// ==================== Key paths ====================

/// Check that a key path is a dotted sequence of identifiers.
///
/// Key paths are spliced into SQL JSON paths, so nothing else is allowed.
pub fn validate_key_path(path: &str) -> StoreResult<()> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(StoreError::data(format!("Invalid key path: {:?}", path)))
    }
}

/// SQLite JSON path for a key path (`patientId` -> `$.patientId`).
pub(crate) fn json_path(path: &str) -> String {
    format!("$.{}", path)
}

/// Look up the value at a key path.
pub fn extract<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Extract a key at a key path. `None` when the field is absent or null.
pub fn extract_key(value: &JsonValue, path: &str) -> StoreResult<Option<Key>> {
    match extract(value, path) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(found) => Key::from_json(found).map(Some),
    }
}

/// Write a generated key into a record at a key path.
pub fn inject_key(value: &mut JsonValue, path: &str, key: &Key) -> StoreResult<()> {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            StoreError::data(format!("Cannot set key path {:?} on a non-object", path))
        })?;
        if segments.peek().is_none() {
            object.insert(segment.to_string(), key.to_json());
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(Default::default()));
    }
    Ok(())
}
