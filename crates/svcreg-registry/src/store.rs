//! Record of every announcement a client has made, kept for replay.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// One successful registration.
///
/// Entries are compared by `id`, never by value: two registrations of the same
/// address are two independent announcements.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: Uuid,
    pub service: String,
    pub protocol: String,
    pub address: String,
    pub registered_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(
        service: impl Into<String>,
        protocol: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            protocol: protocol.into(),
            address: address.into(),
            registered_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} -> {}", self.service, self.protocol, self.address)
    }
}

/// Append-only, insertion-ordered list of entries
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: RwLock<Vec<Arc<Entry>>>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, returning the new length
    pub fn push(&self, entry: Arc<Entry>) -> usize {
        let mut entries = self.entries.write();
        entries.push(entry);
        entries.len()
    }

    /// Copies out the current entries in insertion order
    pub fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
