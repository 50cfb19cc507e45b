//! In-process change notifications.
//!
//! Events reach subscribers of the same `LocalStore` only. Other processes
//! sharing the database file are not notified.

use crate::key::Key;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Store events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The upgrade step ran.
    Upgraded {
        database: String,
        old_version: u32,
        new_version: u32,
    },
    /// A record was added or replaced.
    Changed { collection: String, key: Key },
    /// A record was removed.
    Removed { collection: String, key: Key },
    /// A collection was emptied.
    Cleared { collection: String },
    /// The database was deleted.
    Deleted { database: String },
}

/// Cloneable sender side shared by a store and its backend.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Send an event. Having no subscribers is fine.
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
