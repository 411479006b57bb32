//! In-memory test doubles.
//!
//! [`FakeBackend`] implements both [`ResourceBackend`] and [`SchedulerPump`]
//! over fixture tables. Completions are queued and delivered on [`pump`],
//! which mirrors an asset pipeline that finishes work on its own schedule;
//! eager mode delivers them inline for tests that want everything done
//! immediately.
//!
//! [`pump`]: SchedulerPump::pump

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use lingua_core::{EntryReference, LocaleIdentifier, SharedTableData, TableGuid};
use parking_lot::Mutex;

use crate::backend::{ResourceBackend, ResourceLocation, Table, TableEntry};
use crate::op::handle::{OpHandle, UntypedHandle};
use crate::op::sync::SchedulerPump;
use crate::settings::LocalizationSettings;

/// Fixture table with a fixed entry list and an optional content preload
/// handle the test completes by hand.
pub struct FakeTable {
    collection_name: String,
    locale: LocaleIdentifier,
    entries: Vec<TableEntry>,
    preload: Option<UntypedHandle>,
}

impl FakeTable {
    #[must_use]
    pub fn new(collection_name: impl Into<String>, locale: impl Into<LocaleIdentifier>) -> Self {
        Self {
            collection_name: collection_name.into(),
            locale: locale.into(),
            entries: Vec::new(),
            preload: None,
        }
    }

    #[must_use]
    pub fn with_entry(mut self, id: u64, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push(TableEntry {
            id,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Marks the table as requiring a content preload. The loader will not
    /// report the table ready until `handle` completes.
    #[must_use]
    pub fn with_preload(mut self, handle: &OpHandle<()>) -> Self {
        self.preload = Some(handle.untyped());
        self
    }
}

impl Table for FakeTable {
    fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn locale(&self) -> &LocaleIdentifier {
        &self.locale
    }

    fn entry(&self, reference: &EntryReference) -> Option<TableEntry> {
        self.entries
            .iter()
            .find(|e| match reference {
                EntryReference::Id(id) => e.id == *id,
                EntryReference::Key(key) => e.key == *key,
            })
            .cloned()
    }

    fn preload(&self) -> Option<UntypedHandle> {
        self.preload.clone()
    }
}

type FixtureKey = (String, LocaleIdentifier);

#[derive(Default)]
struct State {
    tables: HashMap<FixtureKey, Arc<FakeTable>>,
    shared: HashMap<TableGuid, Arc<SharedTableData>>,
    load_failures: HashSet<FixtureKey>,
    fail_next_locate: bool,
    queue: VecDeque<Box<dyn FnOnce() + Send>>,
}

/// Scriptable in-memory backend. Handles it returns stay pending until the
/// next [`SchedulerPump::pump`] call unless eager mode is on.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
    eager: AtomicBool,
    locate_calls: AtomicU32,
    load_calls: AtomicU32,
    shared_calls: AtomicU32,
    pumps: AtomicU32,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_table(&self, table: FakeTable) -> Arc<FakeTable> {
        let table = Arc::new(table);
        let key = (table.collection_name.clone(), table.locale.clone());
        self.state.lock().tables.insert(key, Arc::clone(&table));
        table
    }

    pub fn add_shared(&self, data: SharedTableData) {
        self.state.lock().shared.insert(data.guid, Arc::new(data));
    }

    /// Makes `load_table` for this fixture fail.
    pub fn add_load_failure(&self, name: impl Into<String>, locale: impl Into<LocaleIdentifier>) {
        self.state
            .lock()
            .load_failures
            .insert((name.into(), locale.into()));
    }

    /// Makes the next `locate` call fail.
    pub fn fail_next_locate(&self) {
        self.state.lock().fail_next_locate = true;
    }

    /// In eager mode completions are delivered inline instead of queued.
    pub fn set_eager(&self, eager: bool) {
        self.eager.store(eager, Ordering::SeqCst);
    }

    /// Queues `work` for the next pump (or runs it now in eager mode).
    /// Tests use this to schedule hand-rolled completions.
    pub fn defer(&self, work: impl FnOnce() + Send + 'static) {
        if self.eager.load(Ordering::SeqCst) {
            work();
        } else {
            self.state.lock().queue.push_back(Box::new(work));
        }
    }

    #[must_use]
    pub fn locate_calls(&self) -> u32 {
        self.locate_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn load_calls(&self) -> u32 {
        self.load_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn shared_calls(&self) -> u32 {
        self.shared_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pumps(&self) -> u32 {
        self.pumps.load(Ordering::SeqCst)
    }

    fn locale_from_labels(labels: &[String]) -> Option<LocaleIdentifier> {
        labels
            .iter()
            .find_map(|l| l.strip_prefix("Locale-"))
            .map(LocaleIdentifier::new)
    }

    fn matching_locations(&self, labels: &[String]) -> Vec<ResourceLocation> {
        let Some(locale) = Self::locale_from_labels(labels) else {
            return Vec::new();
        };
        let state = self.state.lock();
        let mut found: Vec<ResourceLocation> = state
            .tables
            .iter()
            .filter(|((name, table_locale), _)| {
                *table_locale == locale
                    && labels.iter().all(|label| {
                        label == name
                            || label == "Preload"
                            || *label == LocalizationSettings::locale_label(&locale)
                    })
            })
            .map(|((name, table_locale), _)| ResourceLocation {
                collection_name: name.clone(),
                locale: table_locale.clone(),
                labels: labels.to_vec(),
            })
            .collect();
        found.sort_by(|a, b| a.collection_name.cmp(&b.collection_name));
        found
    }
}

impl SchedulerPump for FakeBackend {
    fn pump(&self) {
        self.pumps.fetch_add(1, Ordering::SeqCst);
        // Snapshot so completions may queue follow-up work for later pumps.
        let batch: Vec<_> = self.state.lock().queue.drain(..).collect();
        for work in batch {
            work();
        }
    }
}

impl ResourceBackend for FakeBackend {
    fn locate(&self, labels: &[String]) -> OpHandle<Vec<ResourceLocation>> {
        self.locate_calls.fetch_add(1, Ordering::SeqCst);
        let handle = OpHandle::new();
        let inject_failure = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.fail_next_locate)
        };
        let result = handle.clone();
        if inject_failure {
            self.defer(move || result.complete_err("injected locate failure"));
        } else {
            let found = self.matching_locations(labels);
            self.defer(move || result.complete_ok(found));
        }
        handle
    }

    fn load_table(&self, location: &ResourceLocation) -> OpHandle<Arc<dyn Table>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let handle = OpHandle::new();
        let key = (location.collection_name.clone(), location.locale.clone());
        let (failure, table) = {
            let state = self.state.lock();
            (
                state.load_failures.contains(&key),
                state.tables.get(&key).cloned(),
            )
        };
        let result = handle.clone();
        let name = key.0;
        match (failure, table) {
            (true, _) => {
                self.defer(move || result.complete_err(format!("injected load failure for '{name}'")));
            }
            (false, Some(table)) => {
                self.defer(move || result.complete_ok(table as Arc<dyn Table>));
            }
            (false, None) => {
                self.defer(move || result.complete_err(format!("no table fixture named '{name}'")));
            }
        }
        handle
    }

    fn load_shared_data(&self, guid: TableGuid) -> OpHandle<Arc<SharedTableData>> {
        self.shared_calls.fetch_add(1, Ordering::SeqCst);
        let handle = OpHandle::new();
        let data = self.state.lock().shared.get(&guid).cloned();
        let result = handle.clone();
        match data {
            Some(data) => self.defer(move || result.complete_ok(data)),
            None => {
                self.defer(move || result.complete_err(format!("no shared table data for {guid}")));
            }
        }
        handle
    }
}
