//! Addressing for table collections and entries.
//!
//! A table collection can be addressed two ways: by an opaque [`TableGuid`]
//! (stable across renames) or by its human collection name. The
//! [`TableReference`] sum type enforces that exactly one form is active.
//! Entries inside a collection are likewise addressed by stable numeric id or
//! by key string via [`EntryReference`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when parsing a [`TableGuid`] from a string.
#[derive(Debug, thiserror::Error)]
#[error("invalid table guid {input:?}: {source}")]
pub struct ParseGuidError {
    /// The rejected input.
    pub input: String,
    source: uuid::Error,
}

/// Opaque stable identifier for a table collection.
///
/// Survives collection renames; the shared table data maps it back to the
/// current collection name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableGuid(Uuid);

impl TableGuid {
    /// Generates a fresh random guid.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TableGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TableGuid {
    type Err = ParseGuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|source| ParseGuidError {
                input: s.to_string(),
                source,
            })
    }
}

/// Reference to a table collection: exactly one addressing form is active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableReference {
    /// Address by opaque collection id. Resolved through shared table data.
    Guid(TableGuid),
    /// Address by human collection name.
    Name(String),
}

impl TableReference {
    /// Creates a name-based reference.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Returns the collection name if this is a name-based reference.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Guid(_) => None,
        }
    }

    /// Returns the guid if this is a guid-based reference.
    #[must_use]
    pub fn as_guid(&self) -> Option<TableGuid> {
        match self {
            Self::Guid(guid) => Some(*guid),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guid(guid) => write!(f, "guid:{guid}"),
            Self::Name(name) => write!(f, "name:{name}"),
        }
    }
}

impl From<TableGuid> for TableReference {
    fn from(guid: TableGuid) -> Self {
        Self::Guid(guid)
    }
}

impl From<&str> for TableReference {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

/// Reference to an entry within a table collection.
///
/// Numeric ids are stable across key renames; key strings are what authors
/// type. Id-based references resolve through the collection's shared data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryReference {
    /// Stable numeric entry id.
    Id(u64),
    /// Entry key string.
    Key(String),
}

impl EntryReference {
    /// Creates a key-based reference.
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }
}

impl fmt::Display for EntryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Key(key) => write!(f, "key:{key}"),
        }
    }
}

impl From<u64> for EntryReference {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for EntryReference {
    fn from(key: &str) -> Self {
        Self::key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_string_round_trip() {
        let guid = TableGuid::random();
        let parsed: TableGuid = guid.to_string().parse().unwrap();
        assert_eq!(parsed, guid);
    }

    #[test]
    fn guid_parse_rejects_garbage() {
        let err = "not-a-guid".parse::<TableGuid>().unwrap_err();
        assert!(err.to_string().contains("not-a-guid"));
    }

    #[test]
    fn reference_exposes_exactly_one_form() {
        let by_name = TableReference::name("UI Strings");
        assert_eq!(by_name.as_name(), Some("UI Strings"));
        assert!(by_name.as_guid().is_none());

        let guid = TableGuid::random();
        let by_guid = TableReference::from(guid);
        assert_eq!(by_guid.as_guid(), Some(guid));
        assert!(by_guid.as_name().is_none());
    }

    #[test]
    fn entry_reference_display_forms() {
        assert_eq!(EntryReference::Id(42).to_string(), "id:42");
        assert_eq!(EntryReference::key("START").to_string(), "key:START");
    }
}
