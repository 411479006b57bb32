//! Runtime configuration: the registered locale set, the selected locale,
//! and preload policy.

use std::sync::Arc;

use arc_swap::ArcSwap;
use lingua_core::{Locale, LocaleIdentifier};

use crate::backend::TableProvider;
use crate::preload::PreloadBehavior;

/// Configuration for a [`LocalizationDatabase`](crate::LocalizationDatabase).
///
/// The locale set and policies are fixed at construction; only the selected
/// locale is hot-swappable (it can change between preload invocations without
/// tearing the database down).
pub struct LocalizationSettings {
    available: Vec<Arc<Locale>>,
    selected: ArcSwap<Locale>,
    preload_behavior: PreloadBehavior,
    preload_label: String,
    drain_budget: usize,
    provider: Option<Arc<dyn TableProvider>>,
}

impl LocalizationSettings {
    /// Creates settings over the given locale set with `selected` active.
    ///
    /// # Errors
    ///
    /// Fails when `locales` is empty or `selected` is not among them.
    pub fn new(locales: Vec<Locale>, selected: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(!locales.is_empty(), "at least one locale must be registered");
        let available: Vec<Arc<Locale>> = locales.into_iter().map(Arc::new).collect();
        let active = available
            .iter()
            .find(|l| l.identifier.code() == selected)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("selected locale {selected:?} is not registered"))?;
        Ok(Self {
            available,
            selected: ArcSwap::new(active),
            preload_behavior: PreloadBehavior::default(),
            preload_label: "Preload".to_string(),
            drain_budget: 64,
            provider: None,
        })
    }

    /// Installs a custom table provider consulted ahead of the default
    /// lookup path.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn TableProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the preload behavior used when callers do not specify one.
    #[must_use]
    pub fn with_preload_behavior(mut self, behavior: PreloadBehavior) -> Self {
        self.preload_behavior = behavior;
        self
    }

    /// Overrides the label that tags preloadable table locations.
    #[must_use]
    pub fn with_preload_label(mut self, label: impl Into<String>) -> Self {
        self.preload_label = label.into();
        self
    }

    /// Overrides the pump budget used by the synchronous completion drain.
    #[must_use]
    pub fn with_drain_budget(mut self, budget: usize) -> Self {
        self.drain_budget = budget;
        self
    }

    /// The currently selected locale.
    #[must_use]
    pub fn selected_locale(&self) -> Arc<Locale> {
        self.selected.load_full()
    }

    /// Switches the selected locale.
    ///
    /// # Errors
    ///
    /// Fails when `code` names a locale that is not registered.
    pub fn set_selected_locale(&self, code: &str) -> anyhow::Result<()> {
        let locale = self
            .available
            .iter()
            .find(|l| l.identifier.code() == code)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("locale {code:?} is not registered"))?;
        self.selected.store(locale);
        Ok(())
    }

    /// Looks up a registered locale by identifier.
    #[must_use]
    pub fn find_locale(&self, identifier: &LocaleIdentifier) -> Option<Arc<Locale>> {
        self.available
            .iter()
            .find(|l| &l.identifier == identifier)
            .cloned()
    }

    /// All registered locales, in registration order.
    #[must_use]
    pub fn available_locales(&self) -> &[Arc<Locale>] {
        &self.available
    }

    /// The label a locale's resources are tagged with.
    #[must_use]
    pub fn locale_label(identifier: &LocaleIdentifier) -> String {
        format!("Locale-{}", identifier.code())
    }

    /// The label that tags preloadable table locations.
    #[must_use]
    pub fn preload_label(&self) -> &str {
        &self.preload_label
    }

    /// Default preload behavior.
    #[must_use]
    pub fn preload_behavior(&self) -> PreloadBehavior {
        self.preload_behavior
    }

    /// Pump budget for the synchronous completion drain.
    #[must_use]
    pub fn drain_budget(&self) -> usize {
        self.drain_budget
    }

    /// The custom table provider, if one is configured.
    #[must_use]
    pub fn provider(&self) -> Option<Arc<dyn TableProvider>> {
        self.provider.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locales() -> Vec<Locale> {
        vec![
            Locale::new("en", "English"),
            Locale::new("fr", "French").with_fallback("en"),
        ]
    }

    #[test]
    fn rejects_empty_locale_set() {
        assert!(LocalizationSettings::new(Vec::new(), "en").is_err());
    }

    #[test]
    fn rejects_unregistered_selected_locale() {
        assert!(LocalizationSettings::new(locales(), "de").is_err());
    }

    #[test]
    fn selected_locale_is_hot_swappable() {
        let settings = LocalizationSettings::new(locales(), "en").unwrap();
        assert_eq!(settings.selected_locale().identifier.code(), "en");

        settings.set_selected_locale("fr").unwrap();
        assert_eq!(settings.selected_locale().identifier.code(), "fr");

        assert!(settings.set_selected_locale("de").is_err());
        assert_eq!(settings.selected_locale().identifier.code(), "fr");
    }

    #[test]
    fn locale_label_format_is_stable() {
        let id = LocaleIdentifier::new("en-GB");
        assert_eq!(LocalizationSettings::locale_label(&id), "Locale-en-GB");
    }
}
