//! Shared table data: the per-collection key space.
//!
//! Every table collection carries one [`SharedTableData`] blob shared by all
//! of its per-locale tables. It binds the collection's [`TableGuid`] to its
//! current name and maps entry keys to stable numeric ids, so guid- and
//! id-based references can be resolved to the human forms and back.

use serde::{Deserialize, Serialize};

use crate::reference::{EntryReference, TableGuid};

/// One key/id binding in a collection's shared key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedEntry {
    /// Stable numeric id, unique within the collection.
    pub id: u64,
    /// Entry key string, unique within the collection.
    pub key: String,
}

/// The shared key space of a table collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedTableData {
    /// Stable collection id.
    pub guid: TableGuid,
    /// Current human collection name.
    pub collection_name: String,
    /// Key/id bindings, in authoring order.
    pub entries: Vec<SharedEntry>,
}

impl SharedTableData {
    /// Creates shared data with an empty key space.
    pub fn new(guid: TableGuid, collection_name: impl Into<String>) -> Self {
        Self {
            guid,
            collection_name: collection_name.into(),
            entries: Vec::new(),
        }
    }

    /// Adds a key/id binding.
    #[must_use]
    pub fn with_entry(mut self, id: u64, key: impl Into<String>) -> Self {
        self.entries.push(SharedEntry {
            id,
            key: key.into(),
        });
        self
    }

    /// Looks up the key bound to a numeric id.
    #[must_use]
    pub fn key_for_id(&self, id: u64) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.key.as_str())
    }

    /// Looks up the numeric id bound to a key.
    #[must_use]
    pub fn id_for_key(&self, key: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.id)
    }

    /// Normalizes an entry reference to its key form, resolving ids through
    /// this key space. Returns `None` when an id has no binding.
    #[must_use]
    pub fn resolve_key<'a>(&'a self, entry: &'a EntryReference) -> Option<&'a str> {
        match entry {
            EntryReference::Key(key) => Some(key),
            EntryReference::Id(id) => self.key_for_id(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SharedTableData {
        SharedTableData::new(TableGuid::random(), "UI Strings")
            .with_entry(1, "START")
            .with_entry(2, "QUIT")
    }

    #[test]
    fn key_and_id_lookups_agree() {
        let shared = sample();
        assert_eq!(shared.key_for_id(1), Some("START"));
        assert_eq!(shared.id_for_key("QUIT"), Some(2));
        assert_eq!(shared.key_for_id(99), None);
        assert_eq!(shared.id_for_key("MISSING"), None);
    }

    #[test]
    fn resolve_key_normalizes_both_forms() {
        let shared = sample();
        assert_eq!(shared.resolve_key(&EntryReference::Id(2)), Some("QUIT"));
        assert_eq!(
            shared.resolve_key(&EntryReference::key("START")),
            Some("START")
        );
        assert_eq!(shared.resolve_key(&EntryReference::Id(7)), None);
    }

    #[test]
    fn serde_round_trip() {
        let shared = sample();
        let json = serde_json::to_string(&shared).unwrap();
        let back: SharedTableData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, shared);
    }
}
