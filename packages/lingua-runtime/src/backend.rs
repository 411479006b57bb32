//! The external collaborator boundary.
//!
//! The runtime does not own table data, resource addressing, or the loading
//! machinery itself; it orchestrates calls into a host asset pipeline behind
//! [`ResourceBackend`]. Every backend method returns an [`OpHandle`]
//! immediately; the handle completes later when the backend's scheduler is
//! pumped (or inline, for backends that resolve from cache).
//!
//! Backends must never let an internal error escape a completion callback:
//! failures are reported by completing the returned handle with
//! `success = false` and a message.

use std::sync::Arc;

use lingua_core::{EntryReference, LocaleIdentifier, SharedTableData, TableGuid};

use crate::op::handle::{OpHandle, UntypedHandle};

/// One localized value in a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Stable numeric id, unique within the collection.
    pub id: u64,
    /// Entry key string.
    pub key: String,
    /// The localized value. May be empty, which entry resolution treats the
    /// same as absent when deciding whether to fall back.
    pub value: String,
}

/// A loaded table: one locale's slice of a table collection.
///
/// The table data model is owned by the host; the runtime only needs
/// identity, entry lookup, and the optional preload capability.
pub trait Table: Send + Sync {
    /// Name of the collection this table belongs to.
    fn collection_name(&self) -> &str;

    /// Locale this table holds values for.
    fn locale(&self) -> &LocaleIdentifier;

    /// Looks up an entry by id or key.
    fn entry(&self, reference: &EntryReference) -> Option<TableEntry>;

    /// Tables whose contents require their own load return the content
    /// preload handle here; the same handle is returned on every call.
    /// `None` means the table is ready as soon as it is loaded.
    fn preload(&self) -> Option<UntypedHandle> {
        None
    }
}

/// Address of one loadable table resource, as reported by the backend's
/// location lookup. Carries the labels it was discovered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocation {
    /// Collection name of the table at this location.
    pub collection_name: String,
    /// Locale of the table at this location.
    pub locale: LocaleIdentifier,
    /// Labels the location is tagged with.
    pub labels: Vec<String>,
}

/// The host asset pipeline.
///
/// Implementations typically also implement
/// [`SchedulerPump`](crate::op::sync::SchedulerPump); the database is
/// constructed from a single object providing both.
pub trait ResourceBackend: Send + Sync {
    /// Finds every resource location tagged with **all** of `labels`.
    /// Completes with an empty list when nothing matches; that is not a
    /// failure.
    fn locate(&self, labels: &[String]) -> OpHandle<Vec<ResourceLocation>>;

    /// Loads the table at a previously discovered location.
    fn load_table(&self, location: &ResourceLocation) -> OpHandle<Arc<dyn Table>>;

    /// Loads the shared key-space data for a collection guid.
    fn load_shared_data(&self, guid: TableGuid) -> OpHandle<Arc<SharedTableData>>;
}

/// Optional pluggable override consulted before the default lookup path.
///
/// A provider may serve tables from anywhere (an in-memory override set, a
/// remote service). Returning `None` declines, sending the resolver down the
/// default resource-location path.
pub trait TableProvider: Send + Sync {
    /// Supplies a table load for `(collection_name, locale)`, or declines.
    fn provide(
        &self,
        collection_name: &str,
        locale: &LocaleIdentifier,
    ) -> Option<OpHandle<Arc<dyn Table>>>;
}
