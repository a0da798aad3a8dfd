//! Cache naming and storage-level row keys.
//!
//! A cache is addressed by its [`CacheName`], which is bounded to
//! [`MAX_NAME_LEN`] characters. Stores persist each entry as two rows
//! named after it, following the transient naming convention:
//!
//! ```text
//! _transient_{name}           -> encoded payload
//! _transient_timeout_{name}   -> expiry
//! ```
//!
//! Truncation is silent: two intended names that share their first 40
//! characters collide on the same entry. Names starting with
//! [`RESERVED_NAME_PREFIX`] are refused at activation, since
//! `_transient_timeout_foo` is both the payload row of `timeout_foo` and
//! the expiry row of `foo`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Maximum length of a cache name, in characters.
pub const MAX_NAME_LEN: usize = 40;

/// Prefix of rows holding a cached payload.
pub const VALUE_ROW_PREFIX: &str = "_transient_";

/// Prefix of rows holding a cached payload's expiry.
pub const TIMEOUT_ROW_PREFIX: &str = "_transient_timeout_";

/// Cache names may not start with this: their payload row would be
/// another cache's expiry row.
pub const RESERVED_NAME_PREFIX: &str = "timeout_";

/// A cache name, truncated to [`MAX_NAME_LEN`] characters at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CacheName(String);

impl CacheName {
    /// Build a name, truncating on a character boundary.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        let truncated = match raw.char_indices().nth(MAX_NAME_LEN) {
            Some((byte_idx, _)) => &raw[..byte_idx],
            None => raw,
        };
        if truncated.len() != raw.len() {
            debug!(
                "Cache name truncated to {} chars: {} -> {}",
                MAX_NAME_LEN, raw, truncated
            );
        }
        CacheName(truncated.to_string())
    }

    /// Substitute `id` into a printf-style template (`%s` or `%d`).
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the template has no placeholder, or
    /// if the rendered name is [reserved](Self::is_reserved).
    pub fn from_template(template: &str, id: impl fmt::Display) -> Result<Self> {
        let pos = [template.find("%s"), template.find("%d")]
            .into_iter()
            .flatten()
            .min()
            .ok_or_else(|| {
                Error::ConfigError(format!("Key template has no placeholder: {}", template))
            })?;

        let rendered = format!("{}{}{}", &template[..pos], id, &template[pos + 2..]);
        let name = Self::new(rendered);
        if name.is_reserved() {
            return Err(Error::ConfigError(format!(
                "Cache name '{}' starts with reserved prefix '{}'",
                name, RESERVED_NAME_PREFIX
            )));
        }
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Whether the name would alias another cache's expiry row.
    pub fn is_reserved(&self) -> bool {
        self.0.starts_with(RESERVED_NAME_PREFIX)
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheName {
    fn from(raw: String) -> Self {
        CacheName::new(raw)
    }
}

impl From<&str> for CacheName {
    fn from(raw: &str) -> Self {
        CacheName::new(raw)
    }
}

impl From<CacheName> for String {
    fn from(name: CacheName) -> Self {
        name.0
    }
}

impl Borrow<str> for CacheName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which of the two row conventions a storage key follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Value,
    Timeout,
}

/// Builds and parses storage-level row names.
pub struct StorageKeys;

impl StorageKeys {
    /// Row holding the payload for `name`.
    pub fn value_row(name: &str) -> String {
        format!("{}{}", VALUE_ROW_PREFIX, name)
    }

    /// Row holding the expiry for `name`.
    pub fn timeout_row(name: &str) -> String {
        format!("{}{}", TIMEOUT_ROW_PREFIX, name)
    }

    /// Split a row name into its kind and cache name.
    ///
    /// Returns `None` for rows outside the transient family.
    pub fn parse_row(row: &str) -> Option<(RowKind, &str)> {
        if let Some(name) = row.strip_prefix(TIMEOUT_ROW_PREFIX) {
            return Some((RowKind::Timeout, name));
        }
        row.strip_prefix(VALUE_ROW_PREFIX)
            .map(|name| (RowKind::Value, name))
    }

    /// Whether a row belongs to a cache whose name starts with `prefix`,
    /// under either row convention.
    pub fn matches_prefix(row: &str, prefix: &str) -> bool {
        match Self::parse_row(row) {
            Some((_, name)) => name.starts_with(prefix),
            None => false,
        }
    }

    /// Whether a row was created by this subsystem at all.
    pub fn is_transient_row(row: &str) -> bool {
        row.starts_with(VALUE_ROW_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_name_untouched() {
        assert_eq!(CacheName::new("recent_posts").as_str(), "recent_posts");
    }

    #[test]
    fn test_long_name_truncated() {
        let raw = "a".repeat(64);
        let name = CacheName::new(&raw);
        assert_eq!(name.as_str().len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_truncation_collision() {
        let shared = "x".repeat(MAX_NAME_LEN);
        let a = CacheName::new(format!("{}_first", shared));
        let b = CacheName::new(format!("{}_second", shared));
        assert_eq!(a, b);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let raw = "é".repeat(50);
        let name = CacheName::new(&raw);
        assert_eq!(name.as_str().chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn test_from_template() {
        let name = CacheName::from_template("post_query_%d", 42).unwrap();
        assert_eq!(name.as_str(), "post_query_42");

        let name = CacheName::from_template("%s_related", "abc").unwrap();
        assert_eq!(name.as_str(), "abc_related");
    }

    #[test]
    fn test_from_template_without_placeholder() {
        let result = CacheName::from_template("post_query", 1);
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_from_template_rejects_reserved_names() {
        let result = CacheName::from_template("timeout_%s", "foo");
        assert!(matches!(result, Err(Error::ConfigError(_))));

        let result = CacheName::from_template("%s_rates", "timeout_eu");
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_reserved_name_would_alias_expiry_row() {
        let name = CacheName::new("timeout_foo");
        assert!(name.is_reserved());
        assert_eq!(
            StorageKeys::value_row(name.as_str()),
            StorageKeys::timeout_row("foo")
        );
        assert!(!CacheName::new("foo_timeout").is_reserved());
    }

    #[test]
    fn test_blank_name_is_empty() {
        assert!(CacheName::new("").is_empty());
        assert!(CacheName::new("   ").is_empty());
        assert!(!CacheName::new("a").is_empty());
    }

    #[test]
    fn test_row_names() {
        assert_eq!(StorageKeys::value_row("feed"), "_transient_feed");
        assert_eq!(StorageKeys::timeout_row("feed"), "_transient_timeout_feed");
    }

    #[test]
    fn test_parse_row() {
        assert_eq!(
            StorageKeys::parse_row("_transient_timeout_feed"),
            Some((RowKind::Timeout, "feed"))
        );
        assert_eq!(
            StorageKeys::parse_row("_transient_feed"),
            Some((RowKind::Value, "feed"))
        );
        assert_eq!(StorageKeys::parse_row("siteurl"), None);
    }

    #[test]
    fn test_matches_prefix_both_conventions() {
        assert!(StorageKeys::matches_prefix("_transient_post_1", "post_"));
        assert!(StorageKeys::matches_prefix("_transient_timeout_post_1", "post_"));
        assert!(!StorageKeys::matches_prefix("_transient_page_1", "post_"));
        assert!(!StorageKeys::matches_prefix("post_1", "post_"));
    }

    proptest! {
        #[test]
        fn prop_name_bounded(raw in ".{0,120}") {
            let name = CacheName::new(&raw);
            prop_assert!(name.as_str().chars().count() <= MAX_NAME_LEN);
        }

        #[test]
        fn prop_truncation_idempotent(raw in ".{0,120}") {
            let once = CacheName::new(&raw);
            let twice = CacheName::new(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_truncation_is_prefix(raw in ".{0,120}") {
            let name = CacheName::new(&raw);
            prop_assert!(raw.starts_with(name.as_str()));
        }
    }
}
