//! Startup preloading.
//!
//! [`PreloadDatabaseOperation`] drives the configured [`PreloadBehavior`]:
//! it picks the set of locales to warm, runs one [`PreloadLocaleOperation`]
//! per locale, and completes with the database once every locale is done.
//!
//! A single locale preload runs in stages: locate every table carrying the
//! preload label, load each located table (reusing in-flight loads for the
//! same key), then wait for the content preloads the loaded tables expose.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use lingua_core::LocaleIdentifier;
use parking_lot::Mutex;

use crate::backend::{ResourceLocation, Table};
use crate::database::LocalizationDatabase;
use crate::op::handle::{OpHandle, UntypedHandle};
use crate::op::pool::Reset;
use crate::op::sync::{drain_via_targets, Drainable, SchedulerPump};
use crate::settings::LocalizationSettings;

/// Which locales to warm when the database initializes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PreloadBehavior {
    /// Tables load lazily on first use.
    NoPreloading,
    /// Preload tables for the selected locale only.
    #[default]
    PreloadSelectedLocale,
    /// Preload the selected locale and its transitive fallbacks.
    PreloadSelectedLocaleAndFallbacks,
    /// Preload every registered locale.
    PreloadAllLocales,
}

/// Walks the fallback graph breadth-first from `start`, returning each
/// reachable locale once. Cycles of any length terminate.
pub fn collect_fallback_chain(
    settings: &LocalizationSettings,
    start: &LocaleIdentifier,
) -> Vec<LocaleIdentifier> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([start.clone()]);
    while let Some(identifier) = queue.pop_front() {
        if !seen.insert(identifier.clone()) {
            continue;
        }
        if let Some(locale) = settings.find_locale(&identifier) {
            queue.extend(locale.fallbacks.iter().cloned());
        }
        order.push(identifier);
    }
    order
}

// ---------------------------------------------------------------------------
// Per-locale preload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LocaleStage {
    #[default]
    Idle,
    Locating,
    LoadingTables,
    PreloadingContents,
    Done,
}

/// Pooled operation preloading every preload-labeled table of one locale.
#[derive(Default)]
pub struct PreloadLocaleOperation {
    stage: LocaleStage,
    started: bool,
    handle: Option<OpHandle<()>>,
    locale: Option<LocaleIdentifier>,
    locations: Option<OpHandle<Vec<ResourceLocation>>>,
    loads: Vec<(String, OpHandle<Arc<dyn Table>>)>,
    load_group: Option<OpHandle<Vec<UntypedHandle>>>,
    contents: Vec<UntypedHandle>,
    content_group: Option<OpHandle<Vec<UntypedHandle>>>,
    current: Option<UntypedHandle>,
}

impl PreloadLocaleOperation {
    pub(crate) fn start(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        handle: OpHandle<()>,
        locale: LocaleIdentifier,
    ) {
        let labels = vec![
            db.settings().preload_label().to_string(),
            LocalizationSettings::locale_label(&locale),
        ];
        let locations = db.backend().locate(&labels);
        {
            let mut guard = operation.lock();
            guard.handle = Some(handle);
            guard.locale = Some(locale);
            guard.locations = Some(locations.clone());
            guard.started = true;
            guard.stage = LocaleStage::Locating;
        }
        Self::suspend(operation, db, locations.untyped());
    }

    fn step(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let stage = operation.lock().stage;
        match stage {
            LocaleStage::Locating => Self::load_located(operation, db),
            LocaleStage::LoadingTables => Self::collect_contents(operation, db),
            LocaleStage::PreloadingContents => Self::finish(operation),
            LocaleStage::Idle | LocaleStage::Done => {}
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

    fn load_located(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let (locations, locale) = {
            let guard = operation.lock();
            (guard.locations.clone(), guard.locale.clone())
        };
        let Some(locale) = locale else {
            Self::complete(operation, false, Some("locale preload started without a locale".to_string()));
            return;
        };
        let Some(locations) = locations else {
            Self::complete(operation, false, Some("location lookup disappeared".to_string()));
            return;
        };

        if !locations.succeeded() {
            let detail = locations
                .message()
                .unwrap_or_else(|| "location lookup failed".to_string());
            Self::complete(
                operation,
                false,
                Some(format!(
                    "Failed to locate preload tables for locale '{locale}': {detail}"
                )),
            );
            return;
        }

        let found = locations.result().unwrap_or_default();
        if found.is_empty() {
            Self::complete(operation, true, None);
            return;
        }

        let mut loads = Vec::with_capacity(found.len());
        for location in &found {
            // Share in-flight loads for the same key; otherwise start one and
            // publish it so later table requests attach to ours.
            let load = db
                .lookup_table(&locale, &location.collection_name)
                .unwrap_or_else(|| {
                    let load = db.backend().load_table(location);
                    db.publish_pending_load(&locale, &location.collection_name, &load);
                    load
                });
            loads.push((location.collection_name.clone(), load));
        }

        let children: Vec<UntypedHandle> = loads.iter().map(|(_, h)| h.untyped()).collect();
        let group = db.start_group(children);
        {
            let mut guard = operation.lock();
            guard.loads = loads;
            guard.load_group = Some(group.clone());
            guard.stage = LocaleStage::LoadingTables;
        }
        Self::suspend(operation, db, group.untyped());
    }

    fn collect_contents(operation: &Arc<Mutex<Self>>, db: &Arc<LocalizationDatabase>) {
        let (loads, locale) = {
            let guard = operation.lock();
            (guard.loads.clone(), guard.locale.clone())
        };
        let mut contents = Vec::new();
        for (name, load) in &loads {
            if !load.succeeded() {
                // Keeping a failed handle in the index would poison the key
                // for the database's lifetime; drop it so a later request
                // loads fresh.
                if let Some(locale) = locale.as_ref() {
                    db.forget_table_handle(locale, name, load);
                }
                continue;
            }
            let Some(table) = load.result() else { continue };
            if let Some(preload) = table.preload() {
                preload.acquire();
                contents.push(preload);
            }
        }

        if contents.is_empty() {
            Self::finish(operation);
            return;
        }

        let group = db.start_group(contents.clone());
        {
            let mut guard = operation.lock();
            guard.contents = contents;
            guard.content_group = Some(group.clone());
            guard.stage = LocaleStage::PreloadingContents;
        }
        Self::suspend(operation, db, group.untyped());
    }

    fn finish(operation: &Arc<Mutex<Self>>) {
        let (load_group, content_group) = {
            let guard = operation.lock();
            (guard.load_group.clone(), guard.content_group.clone())
        };
        let mut success = true;
        let mut messages = Vec::new();
        for group in [load_group, content_group].into_iter().flatten() {
            if !group.succeeded() {
                success = false;
                if let Some(message) = group.message() {
                    messages.push(message);
                }
            }
        }
        let message = if messages.is_empty() {
            None
        } else {
            Some(messages.join("\n"))
        };
        Self::complete(operation, success, message);
    }

    fn complete(operation: &Arc<Mutex<Self>>, success: bool, message: Option<String>) {
        let handle = {
            let mut guard = operation.lock();
            guard.stage = LocaleStage::Done;
            guard.current = None;
            guard.handle.clone()
        };
        if let Some(handle) = handle {
            handle.complete(Some(()), success, message);
        }
    }
}

impl Reset for PreloadLocaleOperation {
    fn reset(&mut self) {
        if let Some(h) = self.locations.take() {
            h.release();
        }
        for (_, h) in self.loads.drain(..) {
            h.release();
        }
        if let Some(h) = self.load_group.take() {
            h.release();
        }
        for h in self.contents.drain(..) {
            h.release();
        }
        if let Some(h) = self.content_group.take() {
            h.release();
        }
        self.stage = LocaleStage::Idle;
        self.started = false;
        self.handle = None;
        self.locale = None;
        self.current = None;
    }
}

impl Drainable for Mutex<PreloadLocaleOperation> {
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

// ---------------------------------------------------------------------------
// Database preload driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum DriverStage {
    #[default]
    Idle,
    WaitingLocales,
    Done,
}

/// Pooled operation preloading the database per a [`PreloadBehavior`].
#[derive(Default)]
pub struct PreloadDatabaseOperation {
    stage: DriverStage,
    started: bool,
    handle: Option<OpHandle<Arc<LocalizationDatabase>>>,
    db: Option<Arc<LocalizationDatabase>>,
    locales: Vec<OpHandle<()>>,
    group: Option<OpHandle<Vec<UntypedHandle>>>,
    current: Option<UntypedHandle>,
}

impl PreloadDatabaseOperation {
    pub(crate) fn start(
        operation: &Arc<Mutex<Self>>,
        db: &Arc<LocalizationDatabase>,
        handle: OpHandle<Arc<LocalizationDatabase>>,
        behavior: PreloadBehavior,
    ) {
        {
            let mut guard = operation.lock();
            guard.handle = Some(handle);
            guard.db = Some(Arc::clone(db));
            guard.started = true;
        }

        let locales = match behavior {
            PreloadBehavior::NoPreloading => {
                Self::complete(operation, true, None);
                return;
            }
            PreloadBehavior::PreloadSelectedLocale => {
                vec![db.settings().selected_locale().identifier.clone()]
            }
            PreloadBehavior::PreloadSelectedLocaleAndFallbacks => {
                let selected = db.settings().selected_locale().identifier.clone();
                collect_fallback_chain(db.settings(), &selected)
            }
            PreloadBehavior::PreloadAllLocales => db
                .settings()
                .available_locales()
                .iter()
                .map(|locale| locale.identifier.clone())
                .collect(),
        };
        tracing::debug!(?behavior, count = locales.len(), "preloading locales");

        let handles: Vec<OpHandle<()>> = locales
            .into_iter()
            .map(|locale| db.preload_locale(locale))
            .collect();
        let children: Vec<UntypedHandle> = handles.iter().map(OpHandle::untyped).collect();
        let group = db.start_group(children);
        {
            let mut guard = operation.lock();
            guard.locales = handles;
            guard.group = Some(group.clone());
            guard.stage = DriverStage::WaitingLocales;
            guard.current = Some(group.untyped());
        }
        let step_op = Arc::clone(operation);
        group.untyped().on_complete_boxed(Box::new(move || {
            Self::group_done(&step_op);
        }));
    }

    fn group_done(operation: &Arc<Mutex<Self>>) {
        let group = operation.lock().group.clone();
        let (success, message) = group
            .map_or((false, Some("locale preload group disappeared".to_string())), |g| {
                (g.succeeded(), g.message())
            });
        Self::complete(operation, success, message);
    }

    fn complete(operation: &Arc<Mutex<Self>>, success: bool, message: Option<String>) {
        let (handle, db) = {
            let mut guard = operation.lock();
            guard.stage = DriverStage::Done;
            guard.current = None;
            (guard.handle.clone(), guard.db.clone())
        };
        if let Some(handle) = handle {
            handle.complete(db, success, message);
        }
    }
}

impl Reset for PreloadDatabaseOperation {
    fn reset(&mut self) {
        for h in self.locales.drain(..) {
            h.release();
        }
        if let Some(h) = self.group.take() {
            h.release();
        }
        self.stage = DriverStage::Idle;
        self.started = false;
        self.handle = None;
        self.db = None;
        self.current = None;
    }
}

impl Drainable for Mutex<PreloadDatabaseOperation> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use lingua_core::Locale;

    fn settings(locales: Vec<Locale>) -> LocalizationSettings {
        LocalizationSettings::new(locales, "en").unwrap()
    }

    #[test]
    fn fallback_chain_walks_transitively() {
        let s = settings(vec![
            Locale::new("en", "English").with_fallback("fr"),
            Locale::new("fr", "French").with_fallback("de"),
            Locale::new("de", "German"),
        ]);
        let chain = collect_fallback_chain(&s, &LocaleIdentifier::new("en"));
        assert_eq!(
            chain,
            vec![
                LocaleIdentifier::new("en"),
                LocaleIdentifier::new("fr"),
                LocaleIdentifier::new("de"),
            ]
        );
    }

    #[test]
    fn fallback_chain_terminates_on_cycle() {
        let s = settings(vec![
            Locale::new("en", "English").with_fallback("es"),
            Locale::new("es", "Spanish").with_fallback("en"),
        ]);
        let chain = collect_fallback_chain(&s, &LocaleIdentifier::new("en"));
        assert_eq!(
            chain,
            vec![LocaleIdentifier::new("en"), LocaleIdentifier::new("es")]
        );
    }

    #[test]
    fn fallback_chain_terminates_on_a_three_locale_cycle() {
        let s = settings(vec![
            Locale::new("en", "English").with_fallback("fr"),
            Locale::new("fr", "French").with_fallback("de"),
            Locale::new("de", "German").with_fallback("en"),
        ]);
        let chain = collect_fallback_chain(&s, &LocaleIdentifier::new("en"));
        assert_eq!(
            chain,
            vec![
                LocaleIdentifier::new("en"),
                LocaleIdentifier::new("fr"),
                LocaleIdentifier::new("de"),
            ]
        );
    }

    #[test]
    fn fallback_chain_includes_unregistered_locales_once() {
        let s = settings(vec![Locale::new("en", "English").with_fallback("xx")]);
        let chain = collect_fallback_chain(&s, &LocaleIdentifier::new("en"));
        assert_eq!(
            chain,
            vec![LocaleIdentifier::new("en"), LocaleIdentifier::new("xx")]
        );
    }
}
