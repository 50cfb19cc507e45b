//! Collection and index declarations.
//!
//! A schema is fixed for a given database version. Adding a collection or
//! an index means shipping a new schema together with a version bump.

use crate::key::{extract_key, validate_key_path, Key};
use medstore_core::{StoreError, StoreResult};
use serde_json::Value as JsonValue;

/// A non-unique secondary index over one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: &'static str,
    pub key_path: &'static str,
}

/// A named partition of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: &'static str,
    /// Field holding the primary key.
    pub key_path: &'static str,
    /// Generate integer keys for records that carry none.
    pub auto_increment: bool,
    pub indexes: &'static [IndexSchema],
}

impl CollectionSchema {
    /// Get an index by name.
    pub fn index(&self, name: &str) -> StoreResult<&'static IndexSchema> {
        let indexes: &'static [IndexSchema] = self.indexes;
        indexes.iter().find(|i| i.name == name).ok_or_else(|| {
            StoreError::data(format!(
                "Index {:?} not found on collection {:?}",
                name, self.name
            ))
        })
    }

    pub fn index_names(&self) -> Vec<&'static str> {
        self.indexes.iter().map(|i| i.name).collect()
    }

    /// Key for a record about to be written. `None` means "generate one".
    pub fn resolve_key(&self, value: &JsonValue) -> StoreResult<Option<Key>> {
        if !value.is_object() {
            return Err(StoreError::data(format!(
                "Records in {} must be objects",
                self.name
            )));
        }
        match extract_key(value, self.key_path)? {
            Some(Key::Text(_)) if self.auto_increment => Err(StoreError::data(format!(
                "Auto-increment collection {} needs integer keys",
                self.name
            ))),
            Some(key) => Ok(Some(key)),
            None if self.auto_increment => Ok(None),
            None => Err(StoreError::data(format!(
                "Record has no key at {:?} in {}",
                self.key_path, self.name
            ))),
        }
    }

    /// SQLite table holding this collection.
    pub(crate) fn table_name(&self) -> String {
        format!("store_{}", self.name)
    }

    pub(crate) fn index_table_name(&self, index: &IndexSchema) -> String {
        format!("index_{}_{}", self.name, index.name)
    }
}

/// The full set of collections in a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseSchema {
    pub collections: &'static [CollectionSchema],
}

impl DatabaseSchema {
    /// Get a collection by name.
    pub fn collection(&self, name: &str) -> StoreResult<&'static CollectionSchema> {
        let collections: &'static [CollectionSchema] = self.collections;
        collections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::data(format!("Collection not found: {}", name)))
    }

    pub fn collection_names(&self) -> Vec<&'static str> {
        self.collections.iter().map(|c| c.name).collect()
    }

    /// Reject names that would collide or could not be embedded in SQL.
    pub fn validate(&self) -> StoreResult<()> {
        for (i, collection) in self.collections.iter().enumerate() {
            validate_identifier(collection.name)?;
            validate_key_path(collection.key_path)?;
            if self.collections[..i]
                .iter()
                .any(|c| c.name == collection.name)
            {
                return Err(StoreError::data(format!(
                    "Duplicate collection: {}",
                    collection.name
                )));
            }
            for (j, index) in collection.indexes.iter().enumerate() {
                validate_identifier(index.name)?;
                validate_key_path(index.key_path)?;
                if collection.indexes[..j].iter().any(|x| x.name == index.name) {
                    return Err(StoreError::data(format!(
                        "Duplicate index {} on {}",
                        index.name, collection.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_identifier(name: &str) -> StoreResult<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::data(format!("Invalid name: {:?}", name)))
    }
}

// ==================== Medical platform schema ====================

pub const PATIENTS: &str = "patients";
pub const MEDICAL_RECORDS: &str = "medicalRecords";
pub const MEDICAL_IMAGES: &str = "medicalImages";
pub const USER_PREFERENCES: &str = "userPreferences";
pub const OFFLINE_ACTIONS: &str = "offlineActions";

const MEDICAL_COLLECTIONS: &[CollectionSchema] = &[
    CollectionSchema {
        name: PATIENTS,
        key_path: "id",
        auto_increment: false,
        indexes: &[],
    },
    CollectionSchema {
        name: MEDICAL_RECORDS,
        key_path: "id",
        auto_increment: false,
        indexes: &[IndexSchema {
            name: "patientId",
            key_path: "patientId",
        }],
    },
    CollectionSchema {
        name: MEDICAL_IMAGES,
        key_path: "id",
        auto_increment: false,
        indexes: &[
            IndexSchema {
                name: "recordId",
                key_path: "recordId",
            },
            IndexSchema {
                name: "patientId",
                key_path: "patientId",
            },
        ],
    },
    CollectionSchema {
        name: USER_PREFERENCES,
        key_path: "id",
        auto_increment: false,
        indexes: &[],
    },
    CollectionSchema {
        name: OFFLINE_ACTIONS,
        key_path: "id",
        auto_increment: true,
        indexes: &[
            IndexSchema {
                name: "status",
                key_path: "status",
            },
            IndexSchema {
                name: "timestamp",
                key_path: "timestamp",
            },
        ],
    },
];

/// Collections of the medical platform database, created at version 1.
pub const MEDICAL_SCHEMA: DatabaseSchema = DatabaseSchema {
    collections: MEDICAL_COLLECTIONS,
};

impl Default for DatabaseSchema {
    fn default() -> Self {
        MEDICAL_SCHEMA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medical_schema_is_valid() {
        MEDICAL_SCHEMA.validate().unwrap();
        assert_eq!(
            MEDICAL_SCHEMA.collection_names(),
            vec![
                "patients",
                "medicalRecords",
                "medicalImages",
                "userPreferences",
                "offlineActions"
            ]
        );
    }

    #[test]
    fn test_lookup() {
        let images = MEDICAL_SCHEMA.collection(MEDICAL_IMAGES).unwrap();
        assert_eq!(images.index_names(), vec!["recordId", "patientId"]);
        assert_eq!(images.index("patientId").unwrap().key_path, "patientId");
        assert!(images.index("status").is_err());
        assert!(MEDICAL_SCHEMA.collection("appointments").is_err());

        let actions = MEDICAL_SCHEMA.collection(OFFLINE_ACTIONS).unwrap();
        assert!(actions.auto_increment);
        assert_eq!(actions.table_name(), "store_offlineActions");
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        const DUP: DatabaseSchema = DatabaseSchema {
            collections: &[
                CollectionSchema {
                    name: "a",
                    key_path: "id",
                    auto_increment: false,
                    indexes: &[],
                },
                CollectionSchema {
                    name: "a",
                    key_path: "id",
                    auto_increment: false,
                    indexes: &[],
                },
            ],
        };
        assert!(DUP.validate().is_err());

        const BAD_NAME: DatabaseSchema = DatabaseSchema {
            collections: &[CollectionSchema {
                name: "a\"; DROP TABLE x",
                key_path: "id",
                auto_increment: false,
                indexes: &[],
            }],
        };
        assert!(BAD_NAME.validate().is_err());
    }
}
