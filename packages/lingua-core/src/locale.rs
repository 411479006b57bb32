//! Locale identity and the fallback graph.
//!
//! A [`LocaleIdentifier`] is an opaque comparable key (a BCP-47-ish code such
//! as `"en"` or `"en-GB"`); a [`Locale`] attaches a display name and an
//! ordered list of fallback edges to it. Fallback edges form a directed graph
//! across the set of registered locales. The graph is **not** guaranteed
//! acyclic, so every traversal over it must carry its own cycle guard.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque comparable key identifying a language/region target.
///
/// Ordering is plain lexicographic byte order on the code, which is stable
/// and matches how locale sets are presented in pickers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocaleIdentifier(String);

impl LocaleIdentifier {
    /// Creates an identifier from a locale code. The code is stored verbatim.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the locale code as a string slice.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocaleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocaleIdentifier {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// A registered locale: identifier, human-readable name, and fallback edges.
///
/// Fallbacks are ordered: the first entry is consulted first when a value is
/// missing for this locale. An empty list means the locale is a sink in the
/// fallback graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    /// Opaque comparable key for this locale.
    pub identifier: LocaleIdentifier,
    /// Human-readable name, e.g. `"English (United Kingdom)"`.
    pub display_name: String,
    /// Ordered fallback edges. Not guaranteed acyclic across the locale set.
    pub fallbacks: Vec<LocaleIdentifier>,
}

impl Locale {
    /// Creates a locale with no fallback edges.
    pub fn new(code: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: LocaleIdentifier::new(code),
            display_name: display_name.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Adds a fallback edge, keeping registration order.
    #[must_use]
    pub fn with_fallback(mut self, code: impl Into<String>) -> Self {
        self.fallbacks.push(LocaleIdentifier::new(code));
        self
    }

    /// Returns the first fallback edge, if any.
    #[must_use]
    pub fn primary_fallback(&self) -> Option<&LocaleIdentifier> {
        self.fallbacks.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_orders_lexicographically() {
        let de = LocaleIdentifier::new("de");
        let en = LocaleIdentifier::new("en");
        let en_gb = LocaleIdentifier::new("en-GB");
        assert!(de < en);
        assert!(en < en_gb);
    }

    #[test]
    fn identifier_serde_is_transparent() {
        let id = LocaleIdentifier::new("fr-CA");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"fr-CA\"");
        let back: LocaleIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn fallbacks_keep_registration_order() {
        let locale = Locale::new("en-AU", "English (Australia)")
            .with_fallback("en-GB")
            .with_fallback("en");
        assert_eq!(locale.primary_fallback().unwrap().code(), "en-GB");
        assert_eq!(locale.fallbacks.len(), 2);
    }

    #[test]
    fn locale_without_fallbacks_is_a_sink() {
        let locale = Locale::new("en", "English");
        assert!(locale.primary_fallback().is_none());
    }
}
