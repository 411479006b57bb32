//! Entry resolution with locale fallback.
//!
//! [`EntryLoadOperation`] waits for the owning table to load, looks the
//! entry up, and, when the entry is missing and fallback is enabled, retries
//! once against the locale's fallback. The retry runs with fallback disabled
//! so a chain of locales never recurses more than one hop per operation.

use std::sync::Arc;

use lingua_core::{EntryReference, LocaleIdentifier, TableReference};
use parking_lot::Mutex;

use crate::backend::{Table, TableEntry};
use crate::database::LocalizationDatabase;
use crate::op::handle::{OpHandle, UntypedHandle};
use crate::op::pool::Reset;
use crate::op::sync::{drain_via_targets, Drainable, SchedulerPump};

/// Outcome of an entry lookup. `table` is the table that was actually
/// consulted for `entry`, which under fallback may belong to a different
/// locale than the one requested.
#[derive(Clone, Default)]
pub struct TableEntryResult {
    pub table: Option<Arc<dyn Table>>,
    pub entry: Option<TableEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum EntryState {
    #[default]
    Idle,
    WaitingTable,
    WaitingFallback,
    Done,
}

/// Pooled operation resolving one entry in one table.
#[derive(Default)]
pub struct EntryLoadOperation {
    state: EntryState,
    started: bool,
    handle: Option<OpHandle<TableEntryResult>>,
    table_ref: Option<TableReference>,
    entry_ref: Option<EntryReference>,
    locale: Option<LocaleIdentifier>,
    use_fallback: bool,
    table_handle: Option<OpHandle<Arc<dyn Table>>>,
    /// Findings from the requested locale, kept in case the fallback lookup
    /// comes back empty-handed.
    first: Option<TableEntryResult>,
    fallback: Option<OpHandle<TableEntryResult>>,
    current: Option<UntypedHandle>,
}

impl EntryLoadOperation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        handle: OpHandle<TableEntryResult>,
        table_ref: TableReference,
        entry_ref: EntryReference,
        locale: LocaleIdentifier,
        use_fallback: bool,
    ) {
        let table_handle = db.get_table_for_locale(table_ref.clone(), locale.clone());
        {
            let mut guard = operation.lock();
            guard.handle = Some(handle);
            guard.table_ref = Some(table_ref);
            guard.entry_ref = Some(entry_ref);
            guard.locale = Some(locale);
            guard.use_fallback = use_fallback;
            guard.table_handle = Some(table_handle.clone());
            guard.started = true;
            guard.state = EntryState::WaitingTable;
        }
        Self::suspend(operation, db, table_handle.untyped());
    }

    fn step(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let state = operation.lock().state;
        match state {
            EntryState::WaitingTable => Self::table_ready(operation, db),
            EntryState::WaitingFallback => Self::fallback_done(operation),
            EntryState::Idle | EntryState::Done => {}
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

    fn table_ready(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let (table_handle, table_ref) = {
            let guard = operation.lock();
            (guard.table_handle.clone(), guard.table_ref.clone())
        };
        let Some(table_handle) = table_handle else {
            Self::complete(operation, TableEntryResult::default(), false, Some("table load disappeared".to_string()));
            return;
        };

        if !table_handle.succeeded() {
            let reference =
                table_ref.map_or_else(|| "<unset>".to_string(), |r| r.to_string());
            let detail = table_handle
                .message()
                .unwrap_or_else(|| "table load failed".to_string());
            Self::complete(
                operation,
                TableEntryResult::default(),
                false,
                Some(format!("Failed to load table {reference}: {detail}")),
            );
            return;
        }

        let Some(table) = table_handle.result() else {
            // Soft miss: the table does not exist for this locale.
            Self::complete(
                operation,
                TableEntryResult::default(),
                true,
                table_handle.message(),
            );
            return;
        };

        let entry = {
            let guard = operation.lock();
            guard
                .entry_ref
                .as_ref()
                .and_then(|r| table.entry(r))
                .filter(|e| !e.value.is_empty())
        };
        if let Some(entry) = entry {
            Self::complete(
                operation,
                TableEntryResult {
                    table: Some(table),
                    entry: Some(entry),
                },
                true,
                None,
            );
            return;
        }

        let found = TableEntryResult {
            table: Some(table),
            entry: None,
        };
        if operation.lock().use_fallback {
            if let Some(fallback) = Self::fallback_locale(db, &found) {
                Self::try_fallback(operation, db, found, fallback);
                return;
            }
        }
        Self::complete(operation, found, true, None);
    }

    fn fallback_locale(
        db: &Arc<LocalizationDatabase>,
        found: &TableEntryResult,
    ) -> Option<LocaleIdentifier> {
        let current = found.table.as_ref()?.locale();
        let locale = db.settings().find_locale(current)?;
        let fallback = locale.primary_fallback()?.clone();
        if &fallback == current {
            return None;
        }
        Some(fallback)
    }

    fn try_fallback(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        found: TableEntryResult,
        fallback: LocaleIdentifier,
    ) {
        let (table_ref, entry_ref) = {
            let guard = operation.lock();
            (guard.table_ref.clone(), guard.entry_ref.clone())
        };
        let (Some(table_ref), Some(entry_ref)) = (table_ref, entry_ref) else {
            Self::complete(operation, found, true, None);
            return;
        };
        tracing::debug!(
            table = %table_ref,
            entry = %entry_ref,
            %fallback,
            "entry missing; retrying against fallback locale"
        );
        let child = db.get_entry_for_locale(table_ref, entry_ref, fallback, false);
        {
            let mut guard = operation.lock();
            guard.first = Some(found);
            guard.fallback = Some(child.clone());
            guard.state = EntryState::WaitingFallback;
        }
        Self::suspend(operation, db, child.untyped());
    }

    fn fallback_done(operation: &Arc<Mutex<Self>>) {
        let (fallback, first) = {
            let mut guard = operation.lock();
            (guard.fallback.clone(), guard.first.take())
        };
        let fallback_result = fallback
            .as_ref()
            .filter(|h| h.succeeded())
            .and_then(OpHandle::result)
            .filter(|r| r.entry.is_some());
        match fallback_result {
            Some(result) => Self::complete(operation, result, true, None),
            None => Self::complete(operation, first.unwrap_or_default(), true, None),
        }
    }

    fn complete(
        operation: &Arc<Mutex<Self>>,
        result: TableEntryResult,
        success: bool,
        message: Option<String>,
    ) {
        let handle = {
            let mut guard = operation.lock();
            guard.state = EntryState::Done;
            guard.current = None;
            guard.handle.clone()
        };
        if let Some(handle) = handle {
            handle.complete(Some(result), success, message);
        }
    }
}

impl Reset for EntryLoadOperation {
    fn reset(&mut self) {
        if let Some(h) = self.table_handle.take() {
            h.release();
        }
        if let Some(h) = self.fallback.take() {
            h.release();
        }
        self.state = EntryState::Idle;
        self.started = false;
        self.handle = None;
        self.table_ref = None;
        self.entry_ref = None;
        self.locale = None;
        self.use_fallback = false;
        self.first = None;
        self.current = None;
    }
}

impl Drainable for Mutex<EntryLoadOperation> {
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
