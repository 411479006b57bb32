//! The localization database facade.
//!
//! [`LocalizationDatabase`] owns the settings, the resource backend, the
//! known-table index, and one pool per operation kind. Every async request
//! returns an [`OpHandle`]; the caller owns one reference on any returned
//! handle and releases it when finished. Handles carry their operation as a
//! drain source so [`LocalizationDatabase::force_completion`] can finish
//! them synchronously.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lingua_core::{EntryReference, LocaleIdentifier, TableReference};
use parking_lot::Mutex;

use crate::backend::{ResourceBackend, Table};
use crate::entry::{EntryLoadOperation, TableEntryResult};
use crate::loader::TableLoadOperation;
use crate::op::group::GroupOperation;
use crate::op::handle::{OpHandle, UntypedHandle};
use crate::op::pool::{OperationPool, PoolStats};
use crate::op::sync::{wait_for_completion, Drainable, SchedulerPump};
use crate::preload::{PreloadBehavior, PreloadDatabaseOperation, PreloadLocaleOperation};
use crate::settings::LocalizationSettings;

type TableKey = (LocaleIdentifier, String);

/// Aggregated pool counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub table_loads: PoolStats,
    pub entry_loads: PoolStats,
    pub groups: PoolStats,
    pub locale_preloads: PoolStats,
    pub database_preloads: PoolStats,
}

pub struct LocalizationDatabase {
    settings: LocalizationSettings,
    backend: Arc<dyn ResourceBackend>,
    pump: Arc<dyn SchedulerPump>,
    /// Loaded and in-flight tables keyed by `(locale, collection name)`.
    /// The index holds one owned reference per stored handle.
    tables: DashMap<TableKey, OpHandle<Arc<dyn Table>>>,
    load_pool: Arc<OperationPool<TableLoadOperation>>,
    entry_pool: Arc<OperationPool<EntryLoadOperation>>,
    group_pool: Arc<OperationPool<GroupOperation>>,
    locale_pool: Arc<OperationPool<PreloadLocaleOperation>>,
    driver_pool: Arc<OperationPool<PreloadDatabaseOperation>>,
}

impl LocalizationDatabase {
    /// The backend doubles as the scheduler pump: completions it has queued
    /// are delivered by calling [`SchedulerPump::pump`] on it.
    pub fn new<B>(settings: LocalizationSettings, backend: Arc<B>) -> Arc<Self>
    where
        B: ResourceBackend + SchedulerPump + 'static,
    {
        Arc::new(Self {
            settings,
            pump: Arc::clone(&backend) as Arc<dyn SchedulerPump>,
            backend,
            tables: DashMap::new(),
            load_pool: Arc::new(OperationPool::new()),
            entry_pool: Arc::new(OperationPool::new()),
            group_pool: Arc::new(OperationPool::new()),
            locale_pool: Arc::new(OperationPool::new()),
            driver_pool: Arc::new(OperationPool::new()),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &LocalizationSettings {
        &self.settings
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ResourceBackend> {
        &self.backend
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    /// Requests the table for the selected locale. The returned handle is
    /// owned by the caller; a missing table completes successfully with no
    /// value and a diagnostic message.
    pub fn get_table(
        self: &Arc<Self>,
        reference: impl Into<TableReference>,
    ) -> OpHandle<Arc<dyn Table>> {
        let locale = self.settings.selected_locale().identifier.clone();
        self.get_table_for_locale(reference.into(), locale)
    }

    pub fn get_table_for_locale(
        self: &Arc<Self>,
        reference: TableReference,
        locale: LocaleIdentifier,
    ) -> OpHandle<Arc<dyn Table>> {
        // Name references can hit the index directly; guid references must
        // recover the name first, so their operation consults it later.
        if let Some(name) = reference.as_name() {
            if let Some(existing) = self.lookup_table(&locale, name) {
                return existing;
            }
        }

        let handle: OpHandle<Arc<dyn Table>> = OpHandle::new();
        let operation = self.load_pool.acquire();
        handle.set_drain_source(Arc::clone(&operation) as Arc<dyn Drainable>);
        let pool = Arc::clone(&self.load_pool);
        let pooled = Arc::clone(&operation);
        handle.set_destroy_hook(Box::new(move || pool.release(pooled)));

        // Publish before starting so a second request for the same name
        // attaches to this load instead of starting its own.
        if let Some(name) = reference.as_name() {
            self.publish_pending_load(&locale, name, &handle);
        }
        TableLoadOperation::start(&operation, self, handle.clone(), reference, locale);
        handle
    }

    /// Registers an externally created table handle under its key.
    /// Re-registering the same handle is a no-op; a different handle holding
    /// the same table is logged and ignored; a conflicting table is an error
    /// and the newer registration is dropped.
    pub fn register_table(
        &self,
        locale: &LocaleIdentifier,
        name: &str,
        handle: &OpHandle<Arc<dyn Table>>,
    ) {
        let key = (locale.clone(), name.to_string());
        match self.tables.entry(key) {
            Entry::Vacant(slot) => {
                handle.acquire();
                slot.insert(handle.clone());
            }
            Entry::Occupied(slot) => {
                let existing = slot.get();
                if existing.same(handle) {
                    return;
                }
                let same_table = match (existing.result(), handle.result()) {
                    (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                    _ => false,
                };
                if same_table {
                    tracing::warn!(
                        %locale,
                        collection = name,
                        "table already registered through another handle; keeping the first"
                    );
                } else {
                    tracing::error!(
                        %locale,
                        collection = name,
                        "conflicting table registration ignored; a different table \
                         is already registered under this key"
                    );
                }
            }
        }
    }

    /// Drops the table under `(locale, name)` from the index, releasing the
    /// index's reference. A later request will load it again.
    pub fn release_table(&self, locale: &LocaleIdentifier, name: &str) {
        if let Some((_, handle)) = self.tables.remove(&(locale.clone(), name.to_string())) {
            handle.release();
        }
    }

    /// Returns the indexed handle for the key with a reference acquired for
    /// the caller.
    pub(crate) fn lookup_table(
        &self,
        locale: &LocaleIdentifier,
        name: &str,
    ) -> Option<OpHandle<Arc<dyn Table>>> {
        let handle = self
            .tables
            .get(&(locale.clone(), name.to_string()))
            .map(|entry| entry.value().clone())?;
        handle.acquire();
        Some(handle)
    }

    /// Indexes a still-pending load so later requests share it. Does nothing
    /// if another handle claimed the key first.
    pub(crate) fn publish_pending_load(
        &self,
        locale: &LocaleIdentifier,
        name: &str,
        handle: &OpHandle<Arc<dyn Table>>,
    ) {
        if let Entry::Vacant(slot) = self.tables.entry((locale.clone(), name.to_string())) {
            handle.acquire();
            slot.insert(handle.clone());
        }
    }

    /// Removes `handle` from the index if it is the one stored under the
    /// key. Failed and not-found loads call this so a retry starts fresh.
    pub(crate) fn forget_table_handle(
        &self,
        locale: &LocaleIdentifier,
        name: &str,
        handle: &OpHandle<Arc<dyn Table>>,
    ) {
        let removed = self
            .tables
            .remove_if(&(locale.clone(), name.to_string()), |_, stored| {
                stored.same(handle)
            });
        if let Some((_, stored)) = removed {
            stored.release();
        }
    }

    // -----------------------------------------------------------------------
    // Entries
    // -----------------------------------------------------------------------

    /// Resolves an entry in the selected locale, falling back one locale hop
    /// when it is missing or empty.
    pub fn get_table_entry(
        self: &Arc<Self>,
        table: impl Into<TableReference>,
        entry: impl Into<EntryReference>,
    ) -> OpHandle<TableEntryResult> {
        let locale = self.settings.selected_locale().identifier.clone();
        self.get_entry_for_locale(table.into(), entry.into(), locale, true)
    }

    pub fn get_entry_for_locale(
        self: &Arc<Self>,
        table: TableReference,
        entry: EntryReference,
        locale: LocaleIdentifier,
        use_fallback: bool,
    ) -> OpHandle<TableEntryResult> {
        let handle: OpHandle<TableEntryResult> = OpHandle::new();
        let operation = self.entry_pool.acquire();
        handle.set_drain_source(Arc::clone(&operation) as Arc<dyn Drainable>);
        let pool = Arc::clone(&self.entry_pool);
        let pooled = Arc::clone(&operation);
        handle.set_destroy_hook(Box::new(move || pool.release(pooled)));
        EntryLoadOperation::start(
            &operation,
            self,
            handle.clone(),
            table,
            entry,
            locale,
            use_fallback,
        );
        handle
    }

    // -----------------------------------------------------------------------
    // Preloading
    // -----------------------------------------------------------------------

    /// Preloads per `behavior`, or per the settings' behavior when `None`.
    /// The handle completes with this database once every selected locale
    /// has finished, failed locales included.
    pub fn preload_all(
        self: &Arc<Self>,
        behavior: Option<PreloadBehavior>,
    ) -> OpHandle<Arc<Self>> {
        let behavior = behavior.unwrap_or_else(|| self.settings.preload_behavior());
        let handle: OpHandle<Arc<Self>> = OpHandle::new();
        let operation = self.driver_pool.acquire();
        handle.set_drain_source(Arc::clone(&operation) as Arc<dyn Drainable>);
        let pool = Arc::clone(&self.driver_pool);
        let pooled = Arc::clone(&operation);
        handle.set_destroy_hook(Box::new(move || pool.release(pooled)));
        PreloadDatabaseOperation::start(&operation, self, handle.clone(), behavior);
        handle
    }

    pub fn preload_locale(self: &Arc<Self>, locale: LocaleIdentifier) -> OpHandle<()> {
        let handle: OpHandle<()> = OpHandle::new();
        let operation = self.locale_pool.acquire();
        handle.set_drain_source(Arc::clone(&operation) as Arc<dyn Drainable>);
        let pool = Arc::clone(&self.locale_pool);
        let pooled = Arc::clone(&operation);
        handle.set_destroy_hook(Box::new(move || pool.release(pooled)));
        PreloadLocaleOperation::start(&operation, self, handle.clone(), locale);
        handle
    }

    // -----------------------------------------------------------------------
    // Groups and synchronous completion
    // -----------------------------------------------------------------------

    /// Wraps `children` in a pooled group operation. The group succeeds only
    /// if every child does; its value is the child list in start order.
    pub fn start_group(
        self: &Arc<Self>,
        children: Vec<UntypedHandle>,
    ) -> OpHandle<Vec<UntypedHandle>> {
        let handle: OpHandle<Vec<UntypedHandle>> = OpHandle::new();
        let operation = self.group_pool.acquire();
        handle.set_drain_source(Arc::clone(&operation) as Arc<dyn Drainable>);
        let pool = Arc::clone(&self.group_pool);
        let pooled = Arc::clone(&operation);
        handle.set_destroy_hook(Box::new(move || pool.release(pooled)));
        GroupOperation::begin(&operation, handle.clone(), children);
        handle
    }

    /// Finishes `handle` synchronously by draining its operation against the
    /// backend pump, bounded by the settings' drain budget. Returns `true`
    /// if the handle completed within the budget.
    pub fn force_completion(&self, handle: &UntypedHandle) -> bool {
        wait_for_completion(handle, &*self.pump, self.settings.drain_budget())
    }

    #[must_use]
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            table_loads: self.load_pool.stats(),
            entry_loads: self.entry_pool.stats(),
            groups: self.group_pool.stats(),
            locale_preloads: self.locale_pool.stats(),
            database_preloads: self.driver_pool.stats(),
        }
    }

    /// Number of keys currently in the known-table index.
    #[must_use]
    pub fn known_tables(&self) -> usize {
        self.tables.len()
    }

    /// Whether the index holds a (possibly still loading) table for the key.
    #[must_use]
    pub fn has_table(&self, locale: &LocaleIdentifier, name: &str) -> bool {
        self.tables.contains_key(&(locale.clone(), name.to_string()))
    }
}

impl Drop for LocalizationDatabase {
    fn drop(&mut self) {
        for entry in self.tables.iter() {
            entry.value().release();
        }
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeTable};
    use lingua_core::Locale;

    fn database() -> (Arc<LocalizationDatabase>, Arc<FakeBackend>) {
        let backend = FakeBackend::new();
        let settings =
            LocalizationSettings::new(vec![Locale::new("en", "English")], "en").unwrap();
        let db = LocalizationDatabase::new(settings, Arc::clone(&backend));
        (db, backend)
    }

    fn pump_until(backend: &FakeBackend, done: impl Fn() -> bool) {
        for _ in 0..32 {
            if done() {
                return;
            }
            backend.pump();
        }
        panic!("handle did not complete within 32 pumps");
    }

    fn completed_table_handle(name: &str) -> OpHandle<Arc<dyn Table>> {
        let handle: OpHandle<Arc<dyn Table>> = OpHandle::new();
        handle.complete_ok(Arc::new(FakeTable::new(name, "en")) as Arc<dyn Table>);
        handle
    }

    #[test]
    fn concurrent_requests_share_one_handle() {
        let (db, backend) = database();
        backend.add_table(FakeTable::new("UI Strings", "en"));

        let first = db.get_table("UI Strings");
        let second = db.get_table("UI Strings");
        assert!(first.same(&second));
        pump_until(&backend, || first.is_done());

        assert_eq!(backend.load_calls(), 1);
        assert_eq!(db.stats().table_loads.created, 1);
        first.release();
        second.release();
    }

    #[test]
    fn conflicting_registration_keeps_the_first_table() {
        let (db, _backend) = database();
        let locale = LocaleIdentifier::new("en");
        let first = completed_table_handle("UI Strings");
        let second = completed_table_handle("UI Strings");

        db.register_table(&locale, "UI Strings", &first);
        db.register_table(&locale, "UI Strings", &second);

        let stored = db.lookup_table(&locale, "UI Strings").unwrap();
        assert!(stored.same(&first));
        stored.release();
    }

    #[test]
    fn reregistering_the_same_handle_is_a_noop() {
        let (db, _backend) = database();
        let locale = LocaleIdentifier::new("en");
        let handle = completed_table_handle("UI Strings");

        db.register_table(&locale, "UI Strings", &handle);
        db.register_table(&locale, "UI Strings", &handle);

        // One index reference plus the creator's.
        assert_eq!(handle.ref_count(), 2);
    }

    #[test]
    fn released_tables_load_again() {
        let (db, backend) = database();
        backend.add_table(FakeTable::new("UI Strings", "en"));
        let locale = LocaleIdentifier::new("en");

        let first = db.get_table("UI Strings");
        pump_until(&backend, || first.is_done());
        first.release();

        db.release_table(&locale, "UI Strings");
        assert_eq!(db.known_tables(), 0);

        let second = db.get_table("UI Strings");
        pump_until(&backend, || second.is_done());
        assert_eq!(backend.load_calls(), 2);
        second.release();
    }

    #[test]
    fn load_operations_return_to_the_pool_once_unreferenced() {
        let (db, backend) = database();

        // A miss is not retained in the index, so releasing the caller's
        // reference destroys the handle and recycles the operation.
        let first = db.get_table("Nope");
        pump_until(&backend, || first.is_done());
        first.release();
        assert_eq!(db.stats().table_loads.created, 1);

        let second = db.get_table("Still Nope");
        pump_until(&backend, || second.is_done());
        assert_eq!(db.stats().table_loads.reused, 1);
        second.release();
    }

    #[test]
    fn groups_aggregate_arbitrary_handles() {
        let (db, _backend) = database();
        let a: OpHandle<()> = OpHandle::new();
        let b: OpHandle<()> = OpHandle::new();

        let group = db.start_group(vec![a.untyped(), b.untyped()]);
        assert!(!group.is_done());
        b.complete_ok(());
        a.complete_err("boom");
        assert!(group.is_done());
        assert!(!group.succeeded());
        assert!(group.message().unwrap().contains("boom"));
        group.release();
    }
}
