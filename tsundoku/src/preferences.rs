//! Migration preferences stored in the [`DeviceKeyValueStore`].
//!
//! Scalar values are stored in their plain string form, sets of strings as JSON arrays.
//! A missing key or a value that does not parse yields the default.

use std::sync::Arc;

use crate::primitives::key_value_store::{DeviceKeyValueStore, KeyValueStoreError};

const MIGRATE_FLAGS_KEY: &str = "migrate_flags";
const MIGRATE_SOURCES_KEY: &str = "migrate_sources";
const SMART_MIGRATE_KEY: &str = "smart_migrate";
const USE_SOURCE_WITH_MOST_KEY: &str = "use_source_with_most";
const SKIP_PRE_MIGRATION_KEY: &str = "skip_pre_migration";
const HIDE_NOT_FOUND_KEY: &str = "hide_not_found_migration";
const ENABLED_LANGUAGES_KEY: &str = "source_languages";
const DISABLED_SOURCES_KEY: &str = "hidden_catalogues";
const PINNED_SOURCES_KEY: &str = "pinned_catalogues";

/// Separator of the ordered source id list.
pub const SOURCE_LIST_SEPARATOR: char = '/';

/// Typed accessors for every preference the migration flow reads.
#[derive(uniffi::Object)]
pub struct MigrationPreferences {
    kv_store: Arc<dyn DeviceKeyValueStore>,
}

#[crate::tsundoku_export]
impl MigrationPreferences {
    /// Wraps the device store.
    #[uniffi::constructor]
    pub fn new(kv_store: Arc<dyn DeviceKeyValueStore>) -> Arc<Self> {
        Arc::new(Self { kv_store })
    }

    /// Bitmask of the state transferred on commit. Defaults to every bit set.
    #[must_use]
    pub fn migrate_flags(&self) -> i32 {
        self.read_parsed(MIGRATE_FLAGS_KEY, i32::MAX)
    }

    /// Stores the transfer bitmask.
    ///
    /// # Errors
    /// [`KeyValueStoreError`] when the store rejects the write.
    pub fn set_migrate_flags(&self, flags: i32) -> Result<(), KeyValueStoreError> {
        self.kv_store
            .set(MIGRATE_FLAGS_KEY.to_string(), flags.to_string())
    }

    /// Ordered candidate source ids. Non numeric segments are ignored.
    #[must_use]
    pub fn migration_sources(&self) -> Vec<i64> {
        self.read_raw(MIGRATE_SOURCES_KEY)
            .map(|raw| parse_source_list(&raw))
            .unwrap_or_default()
    }

    /// Stores the ordered candidate source ids.
    ///
    /// # Errors
    /// [`KeyValueStoreError`] when the store rejects the write.
    pub fn set_migration_sources(&self, source_ids: Vec<i64>) -> Result<(), KeyValueStoreError> {
        self.kv_store
            .set(MIGRATE_SOURCES_KEY.to_string(), join_source_list(&source_ids))
    }

    /// Whether the fuzzy search is used instead of the catalog's own search.
    #[must_use]
    pub fn smart_migration(&self) -> bool {
        self.read_parsed(SMART_MIGRATE_KEY, false)
    }

    /// Stores the smart search toggle.
    ///
    /// # Errors
    /// [`KeyValueStoreError`] when the store rejects the write.
    pub fn set_smart_migration(&self, enabled: bool) -> Result<(), KeyValueStoreError> {
        self.kv_store
            .set(SMART_MIGRATE_KEY.to_string(), enabled.to_string())
    }

    /// Whether every source is searched and the match with most chapters wins.
    #[must_use]
    pub fn use_source_with_most(&self) -> bool {
        self.read_parsed(USE_SOURCE_WITH_MOST_KEY, false)
    }

    /// Stores the most-chapters toggle.
    ///
    /// # Errors
    /// [`KeyValueStoreError`] when the store rejects the write.
    pub fn set_use_source_with_most(&self, enabled: bool) -> Result<(), KeyValueStoreError> {
        self.kv_store
            .set(USE_SOURCE_WITH_MOST_KEY.to_string(), enabled.to_string())
    }

    /// Whether the source selection step is skipped.
    #[must_use]
    pub fn skip_pre_migration(&self) -> bool {
        self.read_parsed(SKIP_PRE_MIGRATION_KEY, false)
    }

    /// Stores the skip-source-selection toggle.
    ///
    /// # Errors
    /// [`KeyValueStoreError`] when the store rejects the write.
    pub fn set_skip_pre_migration(&self, enabled: bool) -> Result<(), KeyValueStoreError> {
        self.kv_store
            .set(SKIP_PRE_MIGRATION_KEY.to_string(), enabled.to_string())
    }

    /// Whether entries without a match are dropped from the session.
    #[must_use]
    pub fn hide_not_found_migration(&self) -> bool {
        self.read_parsed(HIDE_NOT_FOUND_KEY, false)
    }

    /// Stores the hide-not-found toggle.
    ///
    /// # Errors
    /// [`KeyValueStoreError`] when the store rejects the write.
    pub fn set_hide_not_found_migration(&self, enabled: bool) -> Result<(), KeyValueStoreError> {
        self.kv_store
            .set(HIDE_NOT_FOUND_KEY.to_string(), enabled.to_string())
    }

    /// Languages whose sources are shown. Defaults to `all` and `en`.
    #[must_use]
    pub fn enabled_languages(&self) -> Vec<String> {
        self.read_string_set(ENABLED_LANGUAGES_KEY)
            .unwrap_or_else(|| vec!["all".to_string(), "en".to_string()])
    }

    /// Source ids the user hid from the catalog list.
    #[must_use]
    pub fn disabled_sources(&self) -> Vec<i64> {
        self.read_id_set(DISABLED_SOURCES_KEY)
    }

    /// Source ids the user pinned.
    #[must_use]
    pub fn pinned_sources(&self) -> Vec<i64> {
        self.read_id_set(PINNED_SOURCES_KEY)
    }
}

impl MigrationPreferences {
    fn read_raw(&self, key: &str) -> Option<String> {
        match self.kv_store.get(key.to_string()) {
            Ok(value) => Some(value),
            Err(KeyValueStoreError::KeyNotFound) => None,
            Err(e) => {
                crate::warn!("preferences.read_failed key={key} error={e}");
                None
            }
        }
    }

    fn read_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.read_raw(key)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(default)
    }

    fn read_string_set(&self, key: &str) -> Option<Vec<String>> {
        let raw = self.read_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(values) => Some(values),
            Err(e) => {
                crate::warn!("preferences.corrupted key={key} error={e}");
                None
            }
        }
    }

    fn read_id_set(&self, key: &str) -> Vec<i64> {
        self.read_string_set(key)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect()
    }
}

/// Parses a `"/"`-joined id list, skipping segments that are not numbers.
#[must_use]
pub fn parse_source_list(raw: &str) -> Vec<i64> {
    raw.split(SOURCE_LIST_SEPARATOR)
        .filter_map(|segment| segment.trim().parse().ok())
        .collect()
}

/// Joins ids with `"/"`.
#[must_use]
pub fn join_source_list(source_ids: &[i64]) -> String {
    source_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(&SOURCE_LIST_SEPARATOR.to_string())
}
