use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::catalog::CatalogSource;
use crate::migration::MigrationError;
use crate::preferences::MigrationPreferences;

/// One row of the source list shown before a session starts.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct SourceSelectionItem {
    /// Id of the source.
    pub source_id: i64,
    /// Display name.
    pub name: String,
    /// Language code.
    pub lang: String,
    /// Whether the source will be searched.
    pub enabled: bool,
}

/// The editable, ordered list of candidate sources.
///
/// Enabled sources come first in the order they were saved, followed by the others. The
/// order of the enabled rows at [`SourceSelection::confirm`] is the order sessions search in.
#[derive(uniffi::Object)]
pub struct SourceSelection {
    preferences: Arc<MigrationPreferences>,
    items: Mutex<Vec<SourceSelectionItem>>,
}

#[crate::tsundoku_export]
impl SourceSelection {
    /// Builds the list from the installed sources and the saved preferences.
    #[uniffi::constructor]
    pub fn new(
        preferences: Arc<MigrationPreferences>,
        sources: Vec<Arc<dyn CatalogSource>>,
    ) -> Arc<Self> {
        let items = build_items(
            &sources,
            &preferences.enabled_languages(),
            &preferences.migration_sources(),
            &preferences.disabled_sources(),
        );
        Arc::new(Self {
            preferences,
            items: Mutex::new(items),
        })
    }

    /// The rows in display order.
    #[must_use]
    pub fn items(&self) -> Vec<SourceSelectionItem> {
        self.lock_items().clone()
    }

    /// Flips the row at `position`. Returns `false` when there is no such row.
    pub fn toggle(&self, position: u32) -> bool {
        let Ok(index) = usize::try_from(position) else {
            return false;
        };
        match self.lock_items().get_mut(index) {
            Some(item) => {
                item.enabled = !item.enabled;
                true
            }
            None => false,
        }
    }

    /// Enables or disables every row.
    pub fn mass_select(&self, select_all: bool) {
        for item in self.lock_items().iter_mut() {
            item.enabled = select_all;
        }
    }

    /// Mirrors the catalog settings.
    ///
    /// With `match_enabled` exactly the sources not hidden in the catalog list are enabled,
    /// otherwise exactly the pinned ones. Rows are then sorted by name, enabled first.
    pub fn match_selection(&self, match_enabled: bool) {
        let reference = if match_enabled {
            self.preferences.disabled_sources()
        } else {
            self.preferences.pinned_sources()
        };

        let mut items = self.lock_items();
        for item in items.iter_mut() {
            let listed = reference.contains(&item.source_id);
            item.enabled = if match_enabled { !listed } else { listed };
        }
        items.sort_by(|a, b| (!a.enabled, &a.name).cmp(&(!b.enabled, &b.name)));
    }

    /// Saves the enabled rows as the candidate list and returns their ids in order.
    ///
    /// # Errors
    /// `MigrationError::KeyValueStore` when the preference could not be written.
    pub fn confirm(&self) -> Result<Vec<i64>, MigrationError> {
        let enabled: Vec<i64> = self
            .lock_items()
            .iter()
            .filter(|item| item.enabled)
            .map(|item| item.source_id)
            .collect();
        self.preferences.set_migration_sources(enabled.clone())?;
        crate::info!("source_selection.confirmed sources={enabled:?}");
        Ok(enabled)
    }
}

impl SourceSelection {
    fn lock_items(&self) -> MutexGuard<'_, Vec<SourceSelectionItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_items(
    sources: &[Arc<dyn CatalogSource>],
    languages: &[String],
    saved: &[i64],
    disabled: &[i64],
) -> Vec<SourceSelectionItem> {
    let mut rows: Vec<SourceSelectionItem> = sources
        .iter()
        .filter(|source| languages.contains(&source.lang()))
        .map(|source| {
            let source_id = source.id();
            // nothing saved yet: everything not hidden in the catalog list
            let enabled = if saved.is_empty() {
                !disabled.contains(&source_id)
            } else {
                saved.contains(&source_id)
            };
            SourceSelectionItem {
                source_id,
                name: source.name(),
                lang: source.lang(),
                enabled,
            }
        })
        .collect();
    rows.sort_by_cached_key(|row| format!("({}) {}", row.lang, row.name));

    let (mut enabled, disabled): (Vec<_>, Vec<_>) = rows.into_iter().partition(|row| row.enabled);
    enabled.sort_by_key(|row| saved.iter().position(|id| *id == row.source_id));
    enabled.extend(disabled);
    enabled
}
