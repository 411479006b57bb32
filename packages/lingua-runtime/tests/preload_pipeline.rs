//! End-to-end preload scenarios against the in-memory backend.

use std::sync::Arc;

use lingua_core::{Locale, LocaleIdentifier};
use lingua_runtime::testing::{FakeBackend, FakeTable};
use lingua_runtime::{
    LocalizationDatabase, LocalizationSettings, OpHandle, PreloadBehavior, SchedulerPump,
};

fn database(locales: Vec<Locale>, selected: &str) -> (Arc<LocalizationDatabase>, Arc<FakeBackend>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let backend = FakeBackend::new();
    let settings = LocalizationSettings::new(locales, selected).unwrap();
    let db = LocalizationDatabase::new(settings, Arc::clone(&backend));
    (db, backend)
}

fn pump_until(backend: &FakeBackend, done: impl Fn() -> bool) {
    for _ in 0..64 {
        if done() {
            return;
        }
        backend.pump();
    }
    panic!("handle did not complete within 64 pumps");
}

fn three_locales() -> Vec<Locale> {
    vec![
        Locale::new("en", "English"),
        Locale::new("fr", "French"),
        Locale::new("de", "German"),
    ]
}

#[test]
fn preload_all_locales_loads_every_table_once() {
    let (db, backend) = database(three_locales(), "en");
    for locale in ["en", "fr", "de"] {
        backend.add_table(FakeTable::new("UI Strings", locale).with_entry(1, "hello", "hi"));
        backend.add_table(FakeTable::new("Menus", locale));
    }

    let preload = db.preload_all(Some(PreloadBehavior::PreloadAllLocales));
    pump_until(&backend, || preload.is_done());

    assert!(preload.succeeded());
    assert!(Arc::ptr_eq(&preload.result().unwrap(), &db));
    assert_eq!(backend.load_calls(), 6);
    assert_eq!(db.known_tables(), 6);

    // Preloaded tables resolve without another backend round trip.
    let table = db.get_table("Menus");
    assert!(table.is_done());
    assert_eq!(backend.load_calls(), 6);
    table.release();
    preload.release();
}

#[test]
fn selected_locale_and_fallbacks_skips_unrelated_locales() {
    let (db, backend) = database(
        vec![
            Locale::new("en", "English").with_fallback("fr"),
            Locale::new("fr", "French"),
            Locale::new("de", "German"),
        ],
        "en",
    );
    for locale in ["en", "fr", "de"] {
        backend.add_table(FakeTable::new("UI Strings", locale));
    }

    let preload = db.preload_all(Some(PreloadBehavior::PreloadSelectedLocaleAndFallbacks));
    pump_until(&backend, || preload.is_done());

    assert!(preload.succeeded());
    assert_eq!(db.known_tables(), 2);
    assert!(!db.has_table(&LocaleIdentifier::new("de"), "UI Strings"));
    preload.release();
}

#[test]
fn fallback_cycles_terminate() {
    let (db, backend) = database(
        vec![
            Locale::new("en", "English").with_fallback("es"),
            Locale::new("es", "Spanish").with_fallback("en"),
        ],
        "en",
    );
    backend.add_table(FakeTable::new("UI Strings", "en"));
    backend.add_table(FakeTable::new("UI Strings", "es"));

    let preload = db.preload_all(Some(PreloadBehavior::PreloadSelectedLocaleAndFallbacks));
    pump_until(&backend, || preload.is_done());

    assert!(preload.succeeded());
    assert_eq!(db.known_tables(), 2);
    preload.release();
}

#[test]
fn no_preloading_completes_immediately() {
    let (db, backend) = database(three_locales(), "en");
    backend.add_table(FakeTable::new("UI Strings", "en"));

    let preload = db.preload_all(Some(PreloadBehavior::NoPreloading));
    assert!(preload.is_done());
    assert!(preload.succeeded());
    assert_eq!(backend.locate_calls(), 0);
    assert_eq!(db.known_tables(), 0);
    preload.release();
}

#[test]
fn default_behavior_preloads_the_selected_locale() {
    let (db, backend) = database(three_locales(), "fr");
    for locale in ["en", "fr", "de"] {
        backend.add_table(FakeTable::new("UI Strings", locale));
    }

    let preload = db.preload_all(None);
    pump_until(&backend, || preload.is_done());

    assert!(preload.succeeded());
    assert_eq!(db.known_tables(), 1);
    assert_eq!(backend.load_calls(), 1);
    preload.release();
}

#[test]
fn a_failing_table_fails_the_preload_but_not_the_rest() {
    let (db, backend) = database(three_locales(), "en");
    backend.add_table(FakeTable::new("UI Strings", "en"));
    backend.add_table(FakeTable::new("Broken", "en"));
    backend.add_load_failure("Broken", "en");

    let preload = db.preload_all(Some(PreloadBehavior::PreloadSelectedLocale));
    pump_until(&backend, || preload.is_done());

    assert!(!preload.succeeded());
    assert!(preload
        .message()
        .unwrap()
        .contains("injected load failure for 'Broken'"));
    // The database is still delivered and the healthy table is usable.
    assert!(Arc::ptr_eq(&preload.result().unwrap(), &db));
    let table = db.get_table("UI Strings");
    assert!(table.is_done() && table.succeeded());
    table.release();
    preload.release();
}

#[test]
fn a_failed_preload_is_retried_on_the_next_request() {
    let (db, backend) = database(three_locales(), "en");
    backend.add_table(FakeTable::new("Broken", "en"));
    backend.add_load_failure("Broken", "en");

    let preload = db.preload_all(Some(PreloadBehavior::PreloadSelectedLocale));
    pump_until(&backend, || preload.is_done());

    assert!(!preload.succeeded());
    assert_eq!(backend.load_calls(), 1);
    // The failed load must not linger in the index as a stale handle.
    assert!(!db.has_table(&LocaleIdentifier::new("en"), "Broken"));
    preload.release();

    let retry = db.get_table("Broken");
    pump_until(&backend, || retry.is_done());
    assert_eq!(backend.load_calls(), 2);
    assert!(retry
        .message()
        .unwrap()
        .contains("Failed to load table 'Broken'"));
    retry.release();
}

#[test]
fn content_preloads_gate_the_locale() {
    let (db, backend) = database(three_locales(), "en");
    let contents: OpHandle<()> = OpHandle::new();
    backend.add_table(FakeTable::new("Heavy", "en").with_preload(&contents));
    backend.add_table(FakeTable::new("Light", "en"));

    let preload = db.preload_all(Some(PreloadBehavior::PreloadSelectedLocale));
    for _ in 0..16 {
        backend.pump();
    }
    assert!(!preload.is_done());
    assert_eq!(backend.load_calls(), 2);

    contents.complete_ok(());
    assert!(preload.is_done());
    assert!(preload.succeeded());
    preload.release();
}

#[test]
fn force_completion_drains_a_full_preload() {
    let (db, backend) = database(three_locales(), "en");
    for locale in ["en", "fr", "de"] {
        backend.add_table(FakeTable::new("UI Strings", locale));
    }

    let preload = db.preload_all(Some(PreloadBehavior::PreloadAllLocales));
    assert!(db.force_completion(&preload.untyped()));
    assert!(preload.succeeded());
    assert_eq!(db.known_tables(), 3);
    preload.release();
}

#[tokio::test]
async fn preload_can_be_awaited() {
    let (db, backend) = database(three_locales(), "en");
    backend.set_eager(true);
    backend.add_table(FakeTable::new("UI Strings", "en"));

    let preload = db.preload_all(Some(PreloadBehavior::PreloadSelectedLocale));
    preload.wait().await;
    assert!(preload.succeeded());
    assert_eq!(db.known_tables(), 1);
    preload.release();
}
