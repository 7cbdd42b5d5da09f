use crate::migration::unit::{MigrationItem, MigrationUnit, SearchResult};
use crate::migration::MigrationProcedureConfig;

/// The working set of a migration session.
///
/// Lives inside a `tokio::sync::watch` channel. Writers mutate it through
/// `send_if_modified`, so every reader observes either the state before or after a
/// complete update, never a half-applied one.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// What remains to migrate.
    pub config: MigrationProcedureConfig,
    /// `None` until the units were loaded.
    pub units: Option<Vec<MigrationUnit>>,
    /// Units that are no longer searching.
    pub unfinished_count: u32,
    /// Every unit is done searching and at least one has a match.
    pub migration_done: bool,
    /// Progress of the running bulk commit in `[0, 1]`.
    pub commit_progress: Option<f64>,
    /// Entries committed one at a time.
    pub manual_migrations: u32,
}

impl SessionState {
    /// A state for `config` with no units loaded yet.
    #[must_use]
    pub fn new(config: MigrationProcedureConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The loaded units, empty before loading.
    #[must_use]
    pub fn units(&self) -> &[MigrationUnit] {
        self.units.as_deref().unwrap_or_default()
    }

    /// The unit migrating `entry_id`.
    #[must_use]
    pub fn unit(&self, entry_id: i64) -> Option<&MigrationUnit> {
        self.units().iter().find(|unit| unit.entry_id() == entry_id)
    }

    /// Applies `update` to the unit migrating `entry_id`. Returns whether it exists.
    pub fn update_unit(&mut self, entry_id: i64, update: impl FnOnce(&mut MigrationUnit)) -> bool {
        let unit = self
            .units
            .as_mut()
            .and_then(|units| units.iter_mut().find(|unit| unit.entry_id() == entry_id));
        match unit {
            Some(unit) => {
                update(unit);
                true
            }
            None => false,
        }
    }

    /// Installs the loaded units.
    ///
    /// Units removed from the config while loading are dropped, and ids that did not load
    /// leave the config.
    pub fn install_units(&mut self, mut units: Vec<MigrationUnit>) {
        units.retain(|unit| {
            let wanted = self.config.entry_ids.contains(&unit.entry_id());
            if !wanted {
                unit.scope.cancel();
            }
            wanted
        });
        self.config
            .entry_ids
            .retain(|id| units.iter().any(|unit| unit.entry_id() == *id));
        self.units = Some(units);
        self.recompute();
    }

    /// Drops `entry_id` from the config and the working set and cancels its search.
    ///
    /// Returns whether the id was still in the config, so a second call for the same entry
    /// returns `false`. Before the units are loaded only the config changes.
    pub fn remove_unit(&mut self, entry_id: i64) -> bool {
        if !self.config.remove_entry(entry_id) {
            return false;
        }
        if let Some(units) = self.units.as_mut() {
            if let Some(index) = units.iter().position(|unit| unit.entry_id() == entry_id) {
                units.remove(index).scope.cancel();
            }
        }
        true
    }

    /// Recomputes the derived counters.
    pub fn recompute(&mut self) {
        let units = self.units();
        let unfinished = units
            .iter()
            .filter(|unit| unit.search_result.is_terminal())
            .count();
        let done = units.iter().all(|unit| unit.search_result.is_terminal())
            && units
                .iter()
                .any(|unit| matches!(unit.search_result, SearchResult::Result { .. }));

        self.unfinished_count = u32::try_from(unfinished).unwrap_or(u32::MAX);
        self.migration_done = done;
    }

    /// Whether the units were loaded and none remain.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.units.as_ref().is_some_and(Vec::is_empty)
    }

    /// Units without a match.
    #[must_use]
    pub fn skipped_count(&self) -> u32 {
        let skipped = self
            .units()
            .iter()
            .filter(|unit| unit.search_result == SearchResult::NotFound)
            .count();
        u32::try_from(skipped).unwrap_or(u32::MAX)
    }

    /// Immutable copy for the host.
    #[must_use]
    pub fn snapshot(&self) -> MigrationSnapshot {
        MigrationSnapshot {
            loaded: self.units.is_some(),
            items: self.units().iter().map(MigrationUnit::to_item).collect(),
            remaining_entry_ids: self.config.entry_ids.clone(),
            unfinished_count: self.unfinished_count,
            migration_done: self.migration_done,
            commit_progress: self.commit_progress,
            manual_migrations: self.manual_migrations,
        }
    }
}

/// Point-in-time view of a migration session.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct MigrationSnapshot {
    /// Whether the units were loaded.
    pub loaded: bool,
    /// The working set in display order.
    pub items: Vec<MigrationItem>,
    /// Ids still to migrate, to be saved with the procedure config.
    pub remaining_entry_ids: Vec<i64>,
    /// Units that are no longer searching.
    pub unfinished_count: u32,
    /// Every unit is done searching and at least one has a match.
    pub migration_done: bool,
    /// Progress of the running bulk commit.
    pub commit_progress: Option<f64>,
    /// Entries committed one at a time.
    pub manual_migrations: u32,
}

/// Counts shown by the confirmation dialog of a bulk commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Record)]
pub struct MigrateDialog {
    /// Whether the source entries are kept.
    pub copy: bool,
    /// Entries in the working set.
    pub total: u32,
    /// Entries without a match, which the commit skips.
    pub skipped: u32,
}

/// One-off notifications of a session.
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum MigrationEvent {
    /// The working set is empty or a bulk commit finished; the screen should close.
    NavigateOut,
    /// A manually picked entry could not be prepared; the unit is back to not found.
    ManualSearchFailed {
        /// The unit's source entry.
        entry_id: i64,
    },
    /// A bulk commit finished another entry.
    CommitProgress {
        /// Fraction of entries processed.
        progress: f64,
    },
}

/// Receives session changes on the host side.
#[uniffi::export(with_foreign)]
pub trait MigrationObserver: Send + Sync {
    /// Called after every change of the working set.
    fn on_state_changed(&self, snapshot: MigrationSnapshot);

    /// Called for every [`MigrationEvent`].
    fn on_event(&self, event: MigrationEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::unit::ChapterInfo;
    use crate::test_utils::sample_entry;
    use tokio_util::sync::CancellationToken;

    fn state_with_units(ids: &[i64]) -> SessionState {
        let session = CancellationToken::new();
        let mut state = SessionState::new(MigrationProcedureConfig::new(ids.to_vec(), None));
        state.units = Some(
            ids.iter()
                .map(|id| {
                    MigrationUnit::new(
                        sample_entry(*id, 1, "Gantz"),
                        "MangaDex".to_string(),
                        ChapterInfo::default(),
                        &session,
                    )
                })
                .collect(),
        );
        state
    }

    #[test]
    fn test_remove_unit_is_idempotent() {
        let mut state = state_with_units(&[1, 2, 3]);
        let scope = state.unit(2).unwrap().scope.clone();

        assert!(state.remove_unit(2));
        assert!(!state.remove_unit(2));
        assert_eq!(state.config.entry_ids, vec![1, 3]);
        assert_eq!(state.units().len(), 2);
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_removal_while_loading_survives_install() {
        let loaded = state_with_units(&[1, 2, 3]);
        let mut state = SessionState::new(loaded.config.clone());

        assert!(state.remove_unit(2));
        assert!(state.units.is_none());

        state.install_units(loaded.units().to_vec());

        let ids: Vec<i64> = state.units().iter().map(MigrationUnit::entry_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(state.config.entry_ids, vec![1, 3]);
        assert!(loaded.unit(2).unwrap().is_cancelled());
        assert!(!state.remove_unit(2));
    }

    #[test]
    fn test_install_prunes_ids_that_did_not_load() {
        let loaded = state_with_units(&[1, 3]);
        let mut state = SessionState::new(MigrationProcedureConfig::new(vec![1, 2, 3], None));

        state.install_units(loaded.units().to_vec());

        assert_eq!(state.config.entry_ids, vec![1, 3]);
        assert_eq!(state.snapshot().remaining_entry_ids, vec![1, 3]);
        assert!(state.snapshot().loaded);
    }

    #[test]
    fn test_recompute_counts_terminal_units() {
        let mut state = state_with_units(&[1, 2, 3]);
        state.update_unit(1, |unit| unit.search_result = SearchResult::NotFound);
        state.recompute();
        assert_eq!(state.unfinished_count, 1);
        assert!(!state.migration_done);

        state.update_unit(2, |unit| unit.search_result = SearchResult::NotFound);
        state.update_unit(3, |unit| unit.search_result = SearchResult::NotFound);
        state.recompute();
        assert_eq!(state.unfinished_count, 3);
        // all terminal but nothing to migrate
        assert!(!state.migration_done);

        state.update_unit(3, |unit| unit.search_result = SearchResult::Result { entry_id: 30 });
        state.recompute();
        assert!(state.migration_done);
        assert_eq!(state.skipped_count(), 2);
    }

    #[test]
    fn test_drained_only_after_loading() {
        let mut state = SessionState::new(MigrationProcedureConfig::new(vec![1], None));
        assert!(!state.is_drained());
        assert!(!state.snapshot().loaded);

        state.units = Some(Vec::new());
        assert!(state.is_drained());
    }
}
