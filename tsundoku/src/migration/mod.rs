//! Library migration.
//!
//! Moves library entries to another catalog source. For every entry the engine searches the
//! configured candidate sources, picks a match (automatically, or the user picks one by
//! hand) and transfers read progress, categories, tracking, the custom cover and the
//! favorite flag to the matched entry.
//!
//! - [`flags`]: which state a commit transfers
//! - [`SmartSearchEngine`]: finds the counterpart of a title in one source
//! - [`MigrationUnit`]: one entry being migrated
//! - [`MigrationController`]: searches, publishes progress and commits
//! - [`SourceSelection`]: the candidate source list confirmed before a session
//!
//! # Usage
//!
//! ```kotlin
//! val prefs = MigrationPreferences(kvStore)
//! val selection = SourceSelection(prefs, sourceManager.catalogSources())
//! selection.confirm()
//!
//! val controller = MigrationController(
//!     MigrationProcedureConfig(entryIds, extraSearchParams = null),
//!     prefs, sources, entries, chapters, history, categories, tracks, coverCache,
//! )
//! controller.setObserver(screenModelObserver)
//! scope.launch { controller.start() }
//!
//! // after the user confirmed the dialog
//! scope.launch { controller.migrateAll() }
//! ```
//!
//! The host saves `MigrationSnapshot.remainingEntryIds` with the config to survive process
//! death; a new controller created from the saved config resumes with what is left.

mod config;
mod controller;
mod error;
pub mod flags;
mod search;
mod source_selection;
mod state;
mod transfer;
mod unit;

pub use config::{migration_config_from_json, migration_config_to_json, MigrationProcedureConfig};
pub use controller::{MigrationController, MAX_CONCURRENT_SOURCE_SEARCHES};
pub use error::MigrationError;
pub use search::{
    clean_title, normalized_similarity, search_queries, SmartSearchEngine,
    MIN_SMART_ELIGIBLE_THRESHOLD,
};
pub use source_selection::{SourceSelection, SourceSelectionItem};
pub use state::{
    MigrateDialog, MigrationEvent, MigrationObserver, MigrationSnapshot, SessionState,
};
pub use transfer::{transfer_entry, Library};
pub use unit::{ChapterInfo, MigrationItem, MigrationUnit, SearchProgress, SearchResult};
