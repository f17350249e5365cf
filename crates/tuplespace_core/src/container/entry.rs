//! Entries and their persisted form.

use std::fmt;

use serde::{Deserialize, Serialize};
use tuplespace_codec::Value;

use crate::coordination::CoordinationData;
use crate::types::{ContainerId, EntryId};

/// One stored record.
///
/// Entries are immutable; a take removes the entry and a write creates a
/// new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    id: EntryId,
    container: ContainerId,
    value: Value,
    coordination_data: Vec<CoordinationData>,
}

impl Entry {
    /// Creates an entry.
    #[must_use]
    pub fn new(
        id: EntryId,
        container: ContainerId,
        value: Value,
        coordination_data: Vec<CoordinationData>,
    ) -> Self {
        Self {
            id,
            container,
            value,
            coordination_data,
        }
    }

    /// Returns the entry id.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Returns the owning container.
    #[must_use]
    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Returns the payload.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Coordination data the entry was written with.
    #[must_use]
    pub fn coordination_data(&self) -> &[CoordinationData] {
        &self.coordination_data
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.value)
    }
}

/// Encoded form of an entry in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// The payload.
    pub value: Value,
    /// Coordination data used to re-register the entry on restore.
    pub coordination_data: Vec<CoordinationData>,
}

impl From<&Entry> for StoredEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            value: entry.value.clone(),
            coordination_data: entry.coordination_data.clone(),
        }
    }
}

impl StoredEntry {
    /// Rebuilds the entry under its stored identity.
    #[must_use]
    pub fn into_entry(self, id: EntryId, container: ContainerId) -> Entry {
        Entry::new(id, container, self.value, self.coordination_data)
    }
}
