use serde::{Deserialize, Serialize};

use crate::migration::MigrationError;

/// What a migration session works on.
///
/// `entry_ids` is the single record of what remains: the controller removes ids as entries
/// are skipped or migrated and publishes the updated list in every snapshot, so the host can
/// persist it with [`MigrationProcedureConfig::to_json`] and resume after process death.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct MigrationProcedureConfig {
    /// Ids of the library entries to migrate, in display order.
    pub entry_ids: Vec<i64>,
    /// Appended to every catalog query, e.g. a language filter.
    #[serde(default)]
    pub extra_search_params: Option<String>,
}

impl MigrationProcedureConfig {
    /// Creates a config for `entry_ids`.
    #[must_use]
    pub const fn new(entry_ids: Vec<i64>, extra_search_params: Option<String>) -> Self {
        Self {
            entry_ids,
            extra_search_params,
        }
    }

    /// Removes `entry_id`, returning whether it was present.
    pub fn remove_entry(&mut self, entry_id: i64) -> bool {
        match self.entry_ids.iter().position(|id| *id == entry_id) {
            Some(index) => {
                self.entry_ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// Serializes the config.
    ///
    /// # Errors
    /// [`MigrationError::JsonError`] if serialization fails.
    pub fn to_json(&self) -> Result<String, MigrationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restores a config saved with [`MigrationProcedureConfig::to_json`].
    ///
    /// # Errors
    /// [`MigrationError::JsonError`] if `json` is not a valid config.
    pub fn from_json(json: &str) -> Result<Self, MigrationError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Serializes a config for the host.
///
/// # Errors
/// [`MigrationError::JsonError`] if serialization fails.
#[uniffi::export]
pub fn migration_config_to_json(
    config: MigrationProcedureConfig,
) -> Result<String, MigrationError> {
    config.to_json()
}

/// Parses a config saved with [`migration_config_to_json`].
///
/// # Errors
/// [`MigrationError::JsonError`] if `json` is not a valid config.
#[uniffi::export]
pub fn migration_config_from_json(
    json: String,
) -> Result<MigrationProcedureConfig, MigrationError> {
    MigrationProcedureConfig::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_entry_only_once() {
        let mut config = MigrationProcedureConfig::new(vec![4, 8, 15], None);

        assert!(config.remove_entry(8));
        assert!(!config.remove_entry(8));
        assert_eq!(config.entry_ids, vec![4, 15]);
    }

    #[test]
    fn test_json_survives_process_death() {
        let config = MigrationProcedureConfig::new(vec![16, 23, 42], Some("lang:ja".to_string()));

        let json = migration_config_to_json(config.clone()).unwrap();
        let restored = migration_config_from_json(json).unwrap();

        assert_eq!(restored, config);
    }

    #[test]
    fn test_missing_extra_params_default_to_none() {
        let restored = MigrationProcedureConfig::from_json(r#"{"entry_ids":[1]}"#).unwrap();
        assert_eq!(restored.extra_search_params, None);
    }

    #[test]
    fn test_invalid_json_is_reported() {
        match MigrationProcedureConfig::from_json("[1, 2") {
            Err(MigrationError::JsonError { message }) => assert!(!message.is_empty()),
            other => panic!("expected JsonError, got {other:?}"),
        }
    }
}
