//! Persisted key/value access
//!
//! Values are JSON. Reads of malformed data never fail: the `coerce_*`
//! helpers fall back to safe defaults so a corrupted entry degrades to
//! "use default" instead of aborting a cycle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::domain::normalize_domain;
use crate::types::{DailyUsage, ElementRule, TimeLimit};

/// Key/value entries as read from or written to storage.
pub type StorageMap = Map<String, Value>;

/// New values of changed keys, as delivered by a storage-change
/// notification. A removed key maps to `Value::Null`.
pub type StorageChanges = StorageMap;

/// Error type for storage access.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend failed: {0}")]
    Backend(String),
    #[error("Failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Asynchronous key/value store shared by all extension contexts.
///
/// A single `set` call with several entries is applied atomically.
#[allow(async_fn_in_trait)]
pub trait Storage {
    async fn get(&self, keys: &[&str]) -> Result<StorageMap, StorageError>;
    async fn set(&self, entries: StorageMap) -> Result<(), StorageError>;
}

/// Encode a single serializable entry.
pub fn entry<T: serde::Serialize>(key: &str, value: &T) -> Result<(String, Value), StorageError> {
    let value = serde_json::to_value(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    Ok((key.to_string(), value))
}

// =============================================================================
// Default Merging
// =============================================================================

/// Merge the default rule set with stored user toggles.
///
/// Only `checked` is taken from storage, matched by `id`. Defaults missing
/// from storage keep `checked = false`; stored ids that no longer exist are
/// dropped. Anything that is not an array of objects with a string `id` is
/// ignored.
pub fn merge_with_defaults(defaults: &[ElementRule], stored: Option<&Value>) -> Vec<ElementRule> {
    let mut by_id: HashMap<&str, bool> = HashMap::new();

    if let Some(Value::Array(items)) = stored {
        for item in items {
            let Some(id) = item.get("id").and_then(Value::as_str) else {
                continue;
            };
            by_id.insert(id, item.get("checked").is_some_and(is_truthy));
        }
    }

    defaults
        .iter()
        .map(|def| match by_id.get(def.id.as_str()) {
            Some(&checked) => ElementRule { checked, ..def.clone() },
            None => def.clone(),
        })
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

// =============================================================================
// Coercion
// =============================================================================

/// Stored time limits; malformed entries are skipped, domains normalized.
pub fn coerce_time_limits(value: Option<&Value>) -> Vec<TimeLimit> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value::<TimeLimit>(item.clone()).ok())
        .map(|limit| TimeLimit {
            domain: normalize_domain(&limit.domain),
            ..limit
        })
        .filter(|limit| !limit.domain.is_empty())
        .collect()
}

/// Stored usage map; non-numeric and negative totals are dropped.
pub fn coerce_usage(value: Option<&Value>) -> DailyUsage {
    let Some(Value::Object(map)) = value else {
        return DailyUsage::new();
    };

    map.iter()
        .filter_map(|(domain, minutes)| {
            let minutes = minutes.as_f64()?;
            (minutes.is_finite() && minutes >= 0.0).then(|| (domain.clone(), minutes))
        })
        .collect()
}

/// Stored date string, if present.
pub fn coerce_date(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

// =============================================================================
// In-Memory Storage
// =============================================================================

/// In-memory [`Storage`] for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<StorageMap>,
    writes: Cell<usize>,
    failing: Cell<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: StorageMap) -> Self {
        Self {
            entries: RefCell::new(entries),
            ..Self::default()
        }
    }

    /// Current value of a key.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    /// Write a value directly, bypassing the write counter.
    pub fn insert(&self, key: &str, value: Value) {
        self.entries.borrow_mut().insert(key.to_string(), value);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Make every subsequent access fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl Storage for MemoryStorage {
    async fn get(&self, keys: &[&str]) -> Result<StorageMap, StorageError> {
        if self.failing.get() {
            return Err(StorageError::Backend("storage unavailable".to_string()));
        }
        let entries = self.entries.borrow();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: StorageMap) -> Result<(), StorageError> {
        if self.failing.get() {
            return Err(StorageError::Backend("storage unavailable".to_string()));
        }
        self.entries.borrow_mut().extend(entries);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::catalog::default_rules;

    #[test]
    fn test_merge_empty_returns_defaults() {
        let defaults = default_rules();
        assert_eq!(merge_with_defaults(&defaults, Some(&json!([]))), defaults);
        assert_eq!(merge_with_defaults(&defaults, None), defaults);
    }

    #[test]
    fn test_merge_overrides_only_checked() {
        let defaults = default_rules();
        let stored = json!([
            { "id": "home-feed", "checked": true, "selector": "//tampered", "style": "block" },
            { "id": "removed-rule", "checked": true },
        ]);
        let merged = merge_with_defaults(&defaults, Some(&stored));

        assert_eq!(merged.len(), defaults.len());
        let feed = merged.iter().find(|r| r.id == "home-feed").unwrap();
        let default_feed = defaults.iter().find(|r| r.id == "home-feed").unwrap();
        assert!(feed.checked);
        assert_eq!(feed.selector, default_feed.selector);
        assert_eq!(feed.style, default_feed.style);
        assert!(merged.iter().filter(|r| r.id != "home-feed").all(|r| !r.checked));
    }

    #[test]
    fn test_merge_ignores_malformed() {
        let defaults = default_rules();
        let stored = json!([null, 5, { "checked": true }, { "id": 7, "checked": true }]);
        assert_eq!(merge_with_defaults(&defaults, Some(&stored)), defaults);
        assert_eq!(merge_with_defaults(&defaults, Some(&json!("garbage"))), defaults);
    }

    #[test]
    fn test_coerce_time_limits() {
        let value = json!([
            { "id": "1", "domain": "WWW.Reddit.com", "minutes": 10 },
            { "id": "2", "domain": "x.com" },
            "junk",
        ]);
        let limits = coerce_time_limits(Some(&value));
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].domain, "reddit.com");
    }

    #[test]
    fn test_coerce_usage() {
        let value = json!({ "reddit.com": 4.5, "x.com": "lots", "y.com": -1 });
        let usage = coerce_usage(Some(&value));
        assert_eq!(usage.len(), 1);
        assert_eq!(usage.get("reddit.com"), Some(&4.5));
        assert!(coerce_usage(Some(&json!([1, 2]))).is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage_roundtrip_and_failure() {
        let storage = MemoryStorage::new();
        let mut entries = StorageMap::new();
        entries.insert("a".to_string(), json!(1));
        storage.set(entries).await.unwrap();

        let got = storage.get(&["a", "b"]).await.unwrap();
        assert_eq!(got.get("a"), Some(&json!(1)));
        assert!(!got.contains_key("b"));
        assert_eq!(storage.write_count(), 1);

        storage.set_failing(true);
        assert!(storage.get(&["a"]).await.is_err());
        assert!(storage.set(StorageMap::new()).await.is_err());
    }
}
