#![allow(dead_code)]

use std::sync::{Arc, OnceLock, Weak};

use tsundoku::catalog::CatalogSource;
use tsundoku::migration::{MigrationController, MigrationProcedureConfig};
use tsundoku::preferences::MigrationPreferences;
use tsundoku::test_utils::{
    sample_entry, FakeCatalogSource, InMemoryCoverCache, InMemoryDeviceKeyValueStore,
    InMemoryLibrary,
};

/// Id of the source every sample entry lives on.
pub const HOME_SOURCE: i64 = 10;

pub struct Fixture {
    pub library: Arc<InMemoryLibrary>,
    pub covers: Arc<InMemoryCoverCache>,
    pub preferences: Arc<MigrationPreferences>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            library: InMemoryLibrary::new(),
            covers: Arc::new(InMemoryCoverCache::new()),
            preferences: MigrationPreferences::new(Arc::new(InMemoryDeviceKeyValueStore::new())),
        }
    }

    /// Adds favorited entries on [`HOME_SOURCE`] with ids from 1.
    pub fn with_entries(self, titles: &[&str]) -> Self {
        for (id, title) in (1_i64..).zip(titles) {
            self.library.insert_entry(sample_entry(id, HOME_SOURCE, title));
        }
        self
    }

    /// Configures the candidate sources in the given order.
    pub fn with_candidates(self, source_ids: Vec<i64>) -> Self {
        self.preferences.set_migration_sources(source_ids).unwrap();
        self
    }

    pub fn controller(
        &self,
        entry_ids: Vec<i64>,
        sources: Vec<Arc<FakeCatalogSource>>,
    ) -> Arc<MigrationController> {
        let sources: Vec<Arc<dyn CatalogSource>> = sources
            .into_iter()
            .map(|source| source as Arc<dyn CatalogSource>)
            .collect();
        MigrationController::with_library(
            MigrationProcedureConfig::new(entry_ids, None),
            self.preferences.clone(),
            sources,
            self.library.as_library(self.covers.clone()),
        )
    }
}

/// Lets an observer hook reach the controller it observes.
#[derive(Default)]
pub struct ControllerSlot(OnceLock<Weak<MigrationController>>);

impl ControllerSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fill(&self, controller: &Arc<MigrationController>) {
        let _ = self.0.set(Arc::downgrade(controller));
    }

    pub fn get(&self) -> Option<Arc<MigrationController>> {
        self.0.get().and_then(Weak::upgrade)
    }
}
