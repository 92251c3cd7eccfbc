//! Store label type for identifying storage layers.
//!
//! `StoreLabel` is a newtype wrapper around `SmolStr` that provides type safety
//! for store identifiers used in metrics, source tracking, and composition.

use smol_str::SmolStr;
use std::fmt;

/// A label identifying a store layer.
///
/// Used for:
/// - Store identification in `Store::label()`
/// - Response source tracking (which layer served a read)
/// - Metrics labels for composed stores (e.g., `"cache.memory"`)
///
/// # Example
/// ```
/// use entitystore_core::StoreLabel;
///
/// let label = StoreLabel::new("memory");
/// let composed = label.compose(&StoreLabel::new("hot"));
/// assert_eq!(composed.as_str(), "memory.hot");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StoreLabel(SmolStr);

impl StoreLabel {
    /// Creates a new store label.
    #[inline]
    pub fn new(s: impl Into<SmolStr>) -> Self {
        Self(s.into())
    }

    /// Creates a store label from a static string (no allocation).
    #[inline]
    pub const fn new_static(s: &'static str) -> Self {
        Self(SmolStr::new_static(s))
    }

    /// Returns the label as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a reference to the inner `SmolStr`.
    #[inline]
    pub fn as_smol_str(&self) -> &SmolStr {
        &self.0
    }

    /// Composes two labels with a dot separator: "self.other".
    ///
    /// Used for hierarchical naming in composed stores, e.g.
    /// `"cache.memory"` or `"outer.inner.disk"`.
    #[inline]
    pub fn compose(&self, other: &StoreLabel) -> Self {
        Self(SmolStr::from(format!("{}.{}", self.0, other.0)))
    }
}

impl fmt::Display for StoreLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StoreLabel {
    #[inline]
    fn from(s: &str) -> Self {
        Self(SmolStr::new(s))
    }
}

impl From<String> for StoreLabel {
    #[inline]
    fn from(s: String) -> Self {
        Self(SmolStr::from(s))
    }
}

impl From<SmolStr> for StoreLabel {
    #[inline]
    fn from(s: SmolStr) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StoreLabel {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let label = StoreLabel::new("memory");
        assert_eq!(label.as_str(), "memory");
    }

    #[test]
    fn test_new_static() {
        let label = StoreLabel::new_static("disk");
        assert_eq!(label.as_str(), "disk");
    }

    #[test]
    fn test_compose() {
        let outer = StoreLabel::new("cache");
        let inner = StoreLabel::new("memory");
        let composed = outer.compose(&inner);
        assert_eq!(composed.as_str(), "cache.memory");
    }

    #[test]
    fn test_compose_nested() {
        let outer = StoreLabel::new("outer");
        let inner = StoreLabel::new("inner");
        let leaf = StoreLabel::new("disk");

        let composed = outer.compose(&inner).compose(&leaf);
        assert_eq!(composed.as_str(), "outer.inner.disk");
    }

    #[test]
    fn test_from_str() {
        let label: StoreLabel = "test".into();
        assert_eq!(label.as_str(), "test");
    }

    #[test]
    fn test_display() {
        let label = StoreLabel::new("display_test");
        assert_eq!(format!("{}", label), "display_test");
    }

    #[test]
    fn test_equality() {
        let a = StoreLabel::new("same");
        let b = StoreLabel::new("same");
        let c = StoreLabel::new("different");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
