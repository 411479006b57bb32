//! Table resolution and loading.
//!
//! [`TableLoadOperation`] resolves a [`TableReference`] to a loaded table for
//! one locale, as a pooled state machine:
//!
//! ```text
//! Idle -> [guid: ResolvingGuid] -> (Adopting | TryingProvider?) -> Locating
//!      -> Loading -> [PreloadingContents] -> Done
//! ```
//!
//! Guid references first load the collection's shared data to recover its
//! name; failure there is terminal. Name resolution consults an in-flight
//! handle for the same `(locale, collection)` key before anything else, then
//! the optional custom provider, then the default resource-location lookup.
//! Zero locations is a *soft* miss: the operation succeeds with no table and
//! a "Could not find" message. Tables carrying the preload-required
//! capability are not reported ready until their content preload completes.

use std::sync::Arc;

use lingua_core::{LocaleIdentifier, TableReference};
use parking_lot::Mutex;

use crate::backend::{ResourceLocation, Table};
use crate::database::LocalizationDatabase;
use crate::op::handle::{OpHandle, UntypedHandle};
use crate::op::pool::Reset;
use crate::op::sync::{drain_via_targets, Drainable, SchedulerPump};
use crate::settings::LocalizationSettings;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LoadState {
    #[default]
    Idle,
    ResolvingGuid,
    Adopting,
    TryingProvider,
    Locating,
    Loading,
    PreloadingContents,
    Done,
}

/// Pooled operation resolving one table reference for one locale.
#[derive(Default)]
pub struct TableLoadOperation {
    state: LoadState,
    started: bool,
    handle: Option<OpHandle<Arc<dyn Table>>>,
    reference: Option<TableReference>,
    locale: Option<LocaleIdentifier>,
    collection_name: Option<String>,
    /// Non-owning mirror of the child handle the machine is suspended on.
    current: Option<UntypedHandle>,
    shared: Option<OpHandle<Arc<lingua_core::SharedTableData>>>,
    adopted: Option<OpHandle<Arc<dyn Table>>>,
    provider: Option<OpHandle<Arc<dyn Table>>>,
    locations: Option<OpHandle<Vec<ResourceLocation>>>,
    load: Option<OpHandle<Arc<dyn Table>>>,
    loaded: Option<Arc<dyn Table>>,
    preload: Option<UntypedHandle>,
}

impl TableLoadOperation {
    pub(crate) fn start(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        handle: OpHandle<Arc<dyn Table>>,
        reference: TableReference,
        locale: LocaleIdentifier,
    ) {
        {
            let mut guard = operation.lock();
            guard.handle = Some(handle);
            guard.reference = Some(reference);
            guard.locale = Some(locale);
            guard.started = true;
            guard.state = LoadState::Idle;
        }
        Self::step(operation, db);
    }

    /// Advances the machine one state. Invoked from `start` and from child
    /// completion continuations; may run inline at arbitrary stack depth.
    fn step(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let state = operation.lock().state;
        match state {
            LoadState::Idle => Self::resolve_reference(operation, db),
            LoadState::ResolvingGuid => Self::recover_name(operation, db),
            LoadState::Adopting => Self::finish_adoption(operation),
            LoadState::TryingProvider => Self::check_provider(operation, db),
            LoadState::Locating => Self::pick_location(operation, db),
            LoadState::Loading => Self::table_loaded(operation, db),
            LoadState::PreloadingContents => Self::contents_ready(operation, db),
            LoadState::Done => {}
        }
    }

    fn suspend(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        child: UntypedHandle,
    ) {
        operation.lock().current = Some(child.clone());
        let operation = Arc::clone(operation);
        let db = Arc::clone(db);
        child.on_complete_boxed(Box::new(move || Self::step(&operation, &db)));
    }

    fn resolve_reference(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let reference = operation.lock().reference.clone();
        match reference {
            Some(TableReference::Guid(guid)) => {
                let child = db.backend().load_shared_data(guid);
                {
                    let mut guard = operation.lock();
                    guard.state = LoadState::ResolvingGuid;
                    guard.shared = Some(child.clone());
                }
                Self::suspend(operation, db, child.untyped());
            }
            Some(TableReference::Name(name)) => Self::resolve_name(operation, db, &name),
            None => Self::complete(operation, None, false, Some("table load started without a reference".to_string())),
        }
    }

    fn recover_name(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let (shared, reference) = {
            let guard = operation.lock();
            (guard.shared.clone(), guard.reference.clone())
        };
        let recovered = shared
            .as_ref()
            .filter(|h| h.succeeded())
            .and_then(OpHandle::result)
            .map(|data| data.collection_name.clone());
        match recovered {
            Some(name) => Self::resolve_name(operation, db, &name),
            None => {
                let detail = shared
                    .as_ref()
                    .and_then(|h| h.message())
                    .unwrap_or_else(|| "no shared data was returned".to_string());
                let reference =
                    reference.map_or_else(|| "<unset>".to_string(), |r| r.to_string());
                Self::complete(
                    operation,
                    None,
                    false,
                    Some(format!(
                        "Failed to extract the table collection name from shared table data \
                         for {reference}: {detail}"
                    )),
                );
            }
        }
    }

    fn resolve_name(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>, name: &str) {
        let (locale, own) = {
            let mut guard = operation.lock();
            guard.collection_name = Some(name.to_string());
            (guard.locale.clone(), guard.handle.clone())
        };
        let Some(locale) = locale else {
            Self::complete(operation, None, false, Some("table load started without a locale".to_string()));
            return;
        };

        // Reuse an in-flight or completed load for the same key instead of
        // starting a duplicate. Name-based loads insert their own handle
        // before starting, so finding ourselves here is not an adoption.
        // Guid-based loads only learn their name here, so on a miss they
        // publish now; otherwise a second request for the same key would
        // start its own backend load.
        if let Some(existing) = db.lookup_table(&locale, name) {
            if own.as_ref().is_some_and(|h| existing.same(h)) {
                existing.release();
            } else {
                {
                    let mut guard = operation.lock();
                    guard.state = LoadState::Adopting;
                    guard.adopted = Some(existing.clone());
                }
                Self::suspend(operation, db, existing.untyped());
                return;
            }
        } else if let Some(own) = own.as_ref() {
            db.publish_pending_load(&locale, name, own);
        }

        if let Some(provider) = db.settings().provider() {
            if let Some(child) = provider.provide(name, &locale) {
                {
                    let mut guard = operation.lock();
                    guard.state = LoadState::TryingProvider;
                    guard.provider = Some(child.clone());
                }
                Self::suspend(operation, db, child.untyped());
                return;
            }
            tracing::debug!(collection = name, %locale, "custom table provider declined");
        }

        Self::default_lookup(operation, db, name, &locale);
    }

    fn default_lookup(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        name: &str,
        locale: &LocaleIdentifier,
    ) {
        let labels = vec![
            name.to_string(),
            LocalizationSettings::locale_label(locale),
        ];
        let child = db.backend().locate(&labels);
        {
            let mut guard = operation.lock();
            guard.state = LoadState::Locating;
            guard.locations = Some(child.clone());
        }
        Self::suspend(operation, db, child.untyped());
    }

    fn finish_adoption(operation: &Arc<Mutex<Self>>) {
        let adopted = operation.lock().adopted.clone();
        match adopted {
            Some(h) => Self::complete(operation, h.result(), h.succeeded(), h.message()),
            None => Self::complete(
                operation,
                None,
                false,
                Some("adopted table load disappeared".to_string()),
            ),
        }
    }

    fn check_provider(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let provider = operation.lock().provider.clone();
        if let Some(table) = provider.as_ref().filter(|h| h.succeeded()).and_then(OpHandle::result) {
            Self::finish_with_table(operation, db, table);
            return;
        }

        // Provider failure is not terminal: fall through to the default path.
        let (name, locale) = {
            let guard = operation.lock();
            (guard.collection_name.clone(), guard.locale.clone())
        };
        let (Some(name), Some(locale)) = (name, locale) else {
            Self::complete(operation, None, false, Some("table load lost its reference".to_string()));
            return;
        };
        tracing::debug!(
            collection = %name,
            %locale,
            message = ?provider.as_ref().and_then(|h| h.message()),
            "custom table provider failed; using default lookup"
        );
        Self::default_lookup(operation, db, &name, &locale);
    }

    fn pick_location(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let (locations, name, locale) = {
            let guard = operation.lock();
            (
                guard.locations.clone(),
                guard.collection_name.clone().unwrap_or_default(),
                guard.locale.clone(),
            )
        };
        let Some(locations) = locations else {
            Self::complete(operation, None, false, Some("location lookup disappeared".to_string()));
            return;
        };
        let locale_text = locale.as_ref().map_or_else(String::new, ToString::to_string);

        if !locations.succeeded() {
            let detail = locations
                .message()
                .unwrap_or_else(|| "location lookup failed".to_string());
            Self::forget_and_complete(
                operation,
                db,
                None,
                false,
                Some(format!(
                    "Failed to locate table '{name}' for locale '{locale_text}': {detail}"
                )),
            );
            return;
        }

        let found = locations.result().unwrap_or_default();
        match found.into_iter().next() {
            None => {
                // A missing table is not a hard failure.
                Self::forget_and_complete(
                    operation,
                    db,
                    None,
                    true,
                    Some(format!(
                        "Could not find a table with the name '{name}' for locale '{locale_text}'"
                    )),
                );
            }
            Some(location) => {
                let child = db.backend().load_table(&location);
                {
                    let mut guard = operation.lock();
                    guard.state = LoadState::Loading;
                    guard.load = Some(child.clone());
                }
                Self::suspend(operation, db, child.untyped());
            }
        }
    }

    fn table_loaded(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let (load, name, locale) = {
            let guard = operation.lock();
            (
                guard.load.clone(),
                guard.collection_name.clone().unwrap_or_default(),
                guard.locale.clone(),
            )
        };
        let table = load.as_ref().filter(|h| h.succeeded()).and_then(OpHandle::result);
        match table {
            Some(table) => Self::finish_with_table(operation, db, table),
            None => {
                let locale_text = locale.as_ref().map_or_else(String::new, ToString::to_string);
                let detail = load
                    .as_ref()
                    .and_then(|h| h.message())
                    .unwrap_or_else(|| "backend returned no table".to_string());
                Self::forget_and_complete(
                    operation,
                    db,
                    None,
                    false,
                    Some(format!(
                        "Failed to load table '{name}' for locale '{locale_text}': {detail}"
                    )),
                );
            }
        }
    }

    fn finish_with_table(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        table: Arc<dyn Table>,
    ) {
        if let Some(preload) = table.preload() {
            if !preload.is_done() {
                {
                    let mut guard = operation.lock();
                    guard.state = LoadState::PreloadingContents;
                    preload.acquire();
                    guard.preload = Some(preload.clone());
                    guard.loaded = Some(table);
                }
                Self::suspend(operation, db, preload);
                return;
            }
        }
        Self::register_and_complete(operation, db, table);
    }

    fn contents_ready(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let (preload, table, name) = {
            let guard = operation.lock();
            (
                guard.preload.clone(),
                guard.loaded.clone(),
                guard.collection_name.clone().unwrap_or_default(),
            )
        };
        let preload_ok = preload.as_ref().is_some_and(|h| h.succeeded());
        match table {
            Some(table) if preload_ok => Self::register_and_complete(operation, db, table),
            _ => {
                let detail = preload
                    .as_ref()
                    .and_then(|h| h.message())
                    .unwrap_or_else(|| "content preload failed".to_string());
                Self::forget_and_complete(
                    operation,
                    db,
                    None,
                    false,
                    Some(format!(
                        "Failed to preload the contents of table '{name}': {detail}"
                    )),
                );
            }
        }
    }

    fn register_and_complete(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        table: Arc<dyn Table>,
    ) {
        let (locale, own) = {
            let guard = operation.lock();
            (guard.locale.clone(), guard.handle.clone())
        };
        if let (Some(locale), Some(own)) = (locale, own) {
            db.register_table(&locale, table.collection_name(), &own);
        }
        Self::complete(operation, Some(table), true, None);
    }

    /// Failure and not-found paths drop the operation's own handle from the
    /// known-table index (if it was registered there) so a later request for
    /// the same key starts fresh instead of observing a stale miss.
    fn forget_and_complete(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        value: Option<Arc<dyn Table>>,
        success: bool,
        message: Option<String>,
    ) {
        let (locale, name, own) = {
            let guard = operation.lock();
            (
                guard.locale.clone(),
                guard.collection_name.clone(),
                guard.handle.clone(),
            )
        };
        if let (Some(locale), Some(name), Some(own)) = (locale, name, own) {
            db.forget_table_handle(&locale, &name, &own);
        }
        Self::complete(operation, value, success, message);
    }

    fn complete(
        operation: &Arc<Mutex<Self>>,
        value: Option<Arc<dyn Table>>,
        success: bool,
        message: Option<String>,
    ) {
        let handle = {
            let mut guard = operation.lock();
            guard.state = LoadState::Done;
            guard.current = None;
            guard.handle.clone()
        };
        if let Some(handle) = handle {
            handle.complete(value, success, message);
        }
    }
}

impl Reset for TableLoadOperation {
    fn reset(&mut self) {
        if let Some(h) = self.shared.take() {
            h.release();
        }
        if let Some(h) = self.adopted.take() {
            h.release();
        }
        if let Some(h) = self.provider.take() {
            h.release();
        }
        if let Some(h) = self.locations.take() {
            h.release();
        }
        if let Some(h) = self.load.take() {
            h.release();
        }
        if let Some(h) = self.preload.take() {
            h.release();
        }
        self.state = LoadState::Idle;
        self.started = false;
        self.handle = None;
        self.reference = None;
        self.locale = None;
        self.collection_name = None;
        self.current = None;
        self.loaded = None;
    }
}

impl Drainable for Mutex<TableLoadOperation> {
    fn is_done(&self) -> bool {
        self.lock().handle.as_ref().is_some_and(OpHandle::is_done)
    }

    fn has_started(&self) -> bool {
        self.lock().started
    }

    fn current_operation(&self) -> Option<UntypedHandle> {
        self.lock().current.clone()
    }

    fn fail(&self, message: &str) {
        let handle = self.lock().handle.clone();
        if let Some(handle) = handle {
            handle.complete(None, false, Some(message.to_string()));
        }
    }

    fn drain(&self, pump: &dyn SchedulerPump, budget: usize) -> usize {
        drain_via_targets(self, pump, budget)
    }
}
