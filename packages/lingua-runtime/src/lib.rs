//! Asynchronous localization runtime.
//!
//! The runtime resolves localized tables and entries through a backend asset
//! pipeline. Every request returns an [`OpHandle`], a reference-counted
//! completion cell that can be observed with continuations, awaited, or
//! finished synchronously by draining the backend pump. Operations behind
//! the handles are pooled and reset between uses.
//!
//! Construction starts from [`LocalizationSettings`] and a backend
//! implementing [`ResourceBackend`] plus [`SchedulerPump`]:
//!
//! ```no_run
//! # use lingua_core::Locale;
//! # use lingua_runtime::testing::FakeBackend;
//! # use lingua_runtime::{LocalizationDatabase, LocalizationSettings};
//! # fn main() -> anyhow::Result<()> {
//! let settings = LocalizationSettings::new(
//!     vec![Locale::new("en", "English"), Locale::new("fr", "French")],
//!     "en",
//! )?;
//! let db = LocalizationDatabase::new(settings, FakeBackend::new());
//! let strings = db.get_table("UI Strings");
//! db.force_completion(&strings.untyped());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod database;
pub mod entry;
pub mod loader;
pub mod op;
pub mod preload;
pub mod settings;
pub mod testing;

pub use backend::{ResourceBackend, ResourceLocation, Table, TableEntry, TableProvider};
pub use database::{DatabaseStats, LocalizationDatabase};
pub use entry::TableEntryResult;
pub use op::{
    force_completion, wait_for_completion, AnyHandle, Drainable, GroupOperation, OpHandle,
    OpStatus, OperationPool, PoolStats, Reset, SchedulerPump, UntypedHandle,
};
pub use preload::{collect_fallback_chain, PreloadBehavior};
pub use settings::LocalizationSettings;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        let behavior = crate::PreloadBehavior::default();
        assert_eq!(behavior, crate::PreloadBehavior::PreloadSelectedLocale);
    }
}
