//! Locale identifiers, the fallback graph, table references, and shared
//! table data.
//!
//! Pure value types consumed by the runtime crate. Nothing in here is async
//! and nothing touches the resource backend.

pub mod locale;
pub mod reference;
pub mod shared;

pub use locale::{Locale, LocaleIdentifier};
pub use reference::{EntryReference, ParseGuidError, TableGuid, TableReference};
pub use shared::{SharedEntry, SharedTableData};
