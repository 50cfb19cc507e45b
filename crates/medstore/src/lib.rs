//! # medstore
//!
//! Local structured store for offline-capable medical platform clients.
//!
//! ## Features
//!
//! - **LocalStore**: async `open`, `add`, `update`, `get`, `get_all`,
//!   `get_by_index`, `remove`, `clear`, `count`, `is_available`
//! - **Schema**: fixed collections with primary keys and secondary indexes,
//!   created by a versioned upgrade step
//! - **Backends**: SQLite file on disk, or an in-memory fallback
//! - **Typed records**: one Rust type per collection, index lookups checked
//!   at compile time
//! - **OfflineQueue**: pending writes kept in `offlineActions`
//!
//! ## Architecture
//!
//! ```text
//! LocalStore (async, spawn_blocking)
//!     │
//!     ├── DatabaseSchema
//!     │       └── CollectionSchema
//!     │               └── IndexSchema
//!     │
//!     ├── Backend
//!     │       ├── SqliteBackend (one connection per call)
//!     │       └── MemoryBackend
//!     │
//!     └── EventBus
//! ```

pub mod backend;
pub mod events;
pub mod key;
pub mod memory;
pub mod offline;
pub mod records;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use backend::{Backend, BackendKind, Connection, TransactionMode, UpgradeRecord};
pub use events::{EventBus, StoreEvent};
pub use key::Key;
pub use memory::MemoryBackend;
pub use offline::OfflineQueue;
pub use records::{
    IndexField, MedicalImage, MedicalImageIndex, MedicalRecord, MedicalRecordIndex, NoIndex,
    OfflineAction, OfflineActionIndex, OfflineStatus, Patient, Record, UserPreferences,
};
pub use schema::{CollectionSchema, DatabaseSchema, IndexSchema, MEDICAL_SCHEMA};
pub use sqlite::SqliteBackend;
pub use store::LocalStore;

pub use medstore_core::{StoreConfig, StoreError, StoreResult};
