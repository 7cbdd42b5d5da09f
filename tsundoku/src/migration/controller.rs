use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::catalog::{
    CatalogEntry, CatalogSource, CategoryStore, ChapterStore, CoverCache, EntryStore,
    HistoryStore, SourceError, TrackStore,
};
use crate::error::AnyhowErrorExt;
use crate::migration::search::SmartSearchEngine;
use crate::migration::state::{
    MigrateDialog, MigrationEvent, MigrationObserver, MigrationSnapshot, SessionState,
};
use crate::migration::transfer::{transfer_entry, Library};
use crate::migration::unit::{ChapterInfo, MigrationUnit, SearchProgress, SearchResult};
use crate::migration::{MigrationError, MigrationProcedureConfig};
use crate::preferences::MigrationPreferences;

/// Catalog searches running at once for one entry in most-chapters mode.
pub const MAX_CONCURRENT_SOURCE_SEARCHES: usize = 3;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Name shown for entries whose source is not installed.
const UNKNOWN_SOURCE_NAME: &str = "Unknown source";

/// Drives one migration session.
///
/// A session starts with [`MigrationController::start`], which loads one unit per entry id of
/// the procedure config and searches the configured candidate sources for each of them. The
/// user then commits units one by one ([`MigrationController::migrate_now`],
/// [`MigrationController::copy_now`]) or all at once ([`MigrationController::migrate_all`],
/// [`MigrationController::copy_all`]).
///
/// ## Cancellation
///
/// The controller owns a session token. Every unit searches under a child token, so
/// [`MigrationController::cancel_unit_search`] stops one entry while
/// [`MigrationController::dispose`] stops everything. A bulk commit runs under its own child
/// token and is checked between entries; entries already committed stay committed.
///
/// ## Observing
///
/// [`MigrationController::snapshot`] returns the current state. The host registers a
/// [`MigrationObserver`]; Rust callers can use [`MigrationController::subscribe`] and
/// [`MigrationController::events`] instead.
///
/// ## Concurrency
///
/// Only one bulk commit may run at a time. A second call fails fast with
/// [`MigrationError::InvalidOperation`] instead of waiting.
#[derive(uniffi::Object)]
pub struct MigrationController {
    preferences: Arc<MigrationPreferences>,
    sources: Vec<Arc<dyn CatalogSource>>,
    library: Library,
    search_engine: SmartSearchEngine,
    hide_not_found: bool,
    session: CancellationToken,
    started: AtomicBool,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<MigrationEvent>,
    observer: RwLock<Option<Arc<dyn MigrationObserver>>>,
    commit_lock: Mutex<()>,
    commit_token: StdMutex<Option<CancellationToken>>,
}

#[crate::tsundoku_export]
impl MigrationController {
    /// Creates a controller for `config`. Nothing runs until [`MigrationController::start`].
    ///
    /// The hide-not-found preference is read once here and holds for the whole session.
    #[uniffi::constructor]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MigrationProcedureConfig,
        preferences: Arc<MigrationPreferences>,
        sources: Vec<Arc<dyn CatalogSource>>,
        entries: Arc<dyn EntryStore>,
        chapters: Arc<dyn ChapterStore>,
        history: Arc<dyn HistoryStore>,
        categories: Arc<dyn CategoryStore>,
        tracks: Arc<dyn TrackStore>,
        cover_cache: Arc<dyn CoverCache>,
    ) -> Arc<Self> {
        let library = Library {
            entries,
            chapters,
            history,
            categories,
            tracks,
            cover_cache,
        };
        Self::with_library(config, preferences, sources, library)
    }

    /// Loads the units and runs the automatic search pass over all of them.
    ///
    /// Entry ids that no longer resolve are dropped. Returns once every unit was searched,
    /// skipped or cancelled.
    ///
    /// # Errors
    ///
    /// - `MigrationError::InvalidOperation` if the session was already started.
    /// - `MigrationError::Cancelled` if the session was disposed while running.
    pub async fn start(&self) -> Result<(), MigrationError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::InvalidOperation(
                "Migration session already started".to_string(),
            ));
        }

        let run_start_time = Utc::now();
        let entry_ids = self.state.borrow().config.entry_ids.clone();
        crate::info!(
            "migration_session.started entries={} timestamp={}",
            entry_ids.len(),
            run_start_time.to_rfc3339()
        );

        let units = tokio::select! {
            biased;
            () = self.session.cancelled() => return Err(MigrationError::Cancelled),
            units = self.load_units(&entry_ids) => units,
        };
        self.publish(|state| {
            state.install_units(units);
            true
        });
        let (order, drained) = {
            let state = self.state.borrow();
            let order: Vec<i64> = state.units().iter().map(MigrationUnit::entry_id).collect();
            (order, state.is_drained())
        };
        if drained {
            self.emit(MigrationEvent::NavigateOut);
        }

        self.run_search_pass(&order).await?;

        crate::info!(
            "migration_session.search_completed entries={} duration_ms={} timestamp={}",
            order.len(),
            (Utc::now() - run_start_time).num_milliseconds(),
            Utc::now().to_rfc3339()
        );
        Ok(())
    }

    /// Searches one entry again with a fresh scope.
    ///
    /// # Errors
    ///
    /// - `MigrationError::InvalidOperation` if the entry is not part of the session.
    /// - `MigrationError::Cancelled` if the session was disposed.
    pub async fn search_again(&self, entry_id: i64) -> Result<(), MigrationError> {
        if self.session.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let fresh_scope = self.session.child_token();
        let mut previous_scope = None;
        let found = self.publish(|state| {
            let found = state.update_unit(entry_id, |unit| {
                previous_scope = Some(std::mem::replace(&mut unit.scope, fresh_scope));
                unit.search_result = SearchResult::Searching;
                unit.progress = SearchProgress::default();
            });
            if found {
                state.recompute();
            }
            found
        });
        if !found {
            return Err(not_in_session(entry_id));
        }
        if let Some(scope) = previous_scope {
            scope.cancel();
        }

        self.run_search_pass(&[entry_id]).await
    }

    /// Uses an entry the user picked by hand as the match of `unit_entry_id`.
    ///
    /// The unit gets a fresh search scope, which also stops a running automatic search for
    /// it. The picked entry is materialized and its chapters are synced. When that fails the
    /// unit goes back to not found and [`MigrationEvent::ManualSearchFailed`] is emitted.
    ///
    /// # Errors
    ///
    /// - `MigrationError::InvalidOperation` if the unit is not part of the session.
    /// - `MigrationError::Cancelled` if the session was disposed or the pick was cancelled
    ///   meanwhile; the unit keeps its previous result.
    pub async fn use_entry_for_migration(
        &self,
        new_entry_id: i64,
        unit_entry_id: i64,
    ) -> Result<(), MigrationError> {
        if self.session.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let scope = self.session.child_token();
        let fresh_scope = scope.clone();
        let mut previous = None;
        self.publish(|state| {
            let found = state.update_unit(unit_entry_id, |unit| {
                let previous_scope = std::mem::replace(&mut unit.scope, fresh_scope);
                previous = Some((previous_scope, unit.search_result));
                unit.search_result = SearchResult::Searching;
            });
            if found {
                state.recompute();
            }
            found
        });
        let Some((previous_scope, previous_result)) = previous else {
            return Err(not_in_session(unit_entry_id));
        };
        previous_scope.cancel();

        let prepared = tokio::select! {
            biased;
            () = scope.cancelled() => None,
            prepared = self.prepare_manual_match(new_entry_id) => Some(prepared),
        };
        let Some(prepared) = prepared else {
            // an interrupted automatic search has no result to go back to
            let restored = if previous_result == SearchResult::Searching {
                SearchResult::NotFound
            } else {
                previous_result
            };
            self.publish(|state| {
                let found = state.update_unit(unit_entry_id, |unit| {
                    if unit.search_result == SearchResult::Searching {
                        unit.search_result = restored;
                    }
                });
                state.recompute();
                found
            });
            return Err(MigrationError::Cancelled);
        };

        let search_result = match prepared {
            Ok(entry) => {
                self.enrich_details(&entry).await;
                crate::info!(
                    "migration_unit.manual_match entry_id={} target_id={} timestamp={}",
                    unit_entry_id,
                    entry.id,
                    Utc::now().to_rfc3339()
                );
                SearchResult::Result { entry_id: entry.id }
            }
            Err(e) => {
                crate::warn!(
                    "migration_unit.manual_match_failed entry_id={} target_id={} error={} \
                     timestamp={}",
                    unit_entry_id,
                    new_entry_id,
                    e,
                    Utc::now().to_rfc3339()
                );
                SearchResult::NotFound
            }
        };

        self.publish(|state| {
            let found = state.update_unit(unit_entry_id, |unit| unit.search_result = search_result);
            state.recompute();
            found
        });
        if search_result == SearchResult::NotFound {
            self.emit(MigrationEvent::ManualSearchFailed {
                entry_id: unit_entry_id,
            });
        }
        Ok(())
    }

    /// Skips an entry: removes it from the session and cancels its search.
    ///
    /// Returns `false` when the entry was already removed, so concurrent calls remove it once.
    pub fn remove_entry(&self, entry_id: i64) -> bool {
        if !self.take_unit(entry_id) {
            return false;
        }
        crate::info!(
            "migration_unit.removed entry_id={} timestamp={}",
            entry_id,
            Utc::now().to_rfc3339()
        );
        if self.state.borrow().is_drained() {
            self.emit(MigrationEvent::NavigateOut);
        }
        true
    }

    /// Cancels the running search of one entry. Its status stays as it was.
    pub fn cancel_unit_search(&self, entry_id: i64) -> bool {
        let scope = self.state.borrow().unit(entry_id).map(|unit| unit.scope.clone());
        scope.is_some_and(|scope| {
            scope.cancel();
            true
        })
    }

    /// Ends the session: cancels every search and a running bulk commit.
    pub fn dispose(&self) {
        self.session.cancel();
        crate::info!(
            "migration_session.disposed timestamp={}",
            Utc::now().to_rfc3339()
        );
    }

    /// Commits every matched entry, removing the source entries from the library.
    ///
    /// # Errors
    ///
    /// See [`MigrationController::copy_all`].
    pub async fn migrate_all(&self) -> Result<(), MigrationError> {
        self.run_bulk_commit(true).await
    }

    /// Commits every matched entry, keeping the source entries.
    ///
    /// Entries that fail are logged and stay in the working set. Progress is published
    /// after each entry.
    ///
    /// # Errors
    ///
    /// - `MigrationError::InvalidOperation` if another bulk commit is running.
    /// - `MigrationError::Cancelled` if [`MigrationController::cancel_commit`] or
    ///   [`MigrationController::dispose`] was called; committed entries stay committed.
    pub async fn copy_all(&self) -> Result<(), MigrationError> {
        self.run_bulk_commit(false).await
    }

    /// Stops a running bulk commit after the entry in progress. Returns whether one was running.
    pub fn cancel_commit(&self) -> bool {
        let token = self
            .commit_token
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        token.is_some_and(|token| {
            token.cancel();
            true
        })
    }

    /// Commits one entry, removing the source entry from the library.
    ///
    /// # Errors
    ///
    /// See [`MigrationController::copy_now`].
    pub async fn migrate_now(&self, entry_id: i64) -> Result<(), MigrationError> {
        self.commit_single(entry_id, true).await
    }

    /// Commits one entry, keeping the source entry.
    ///
    /// # Errors
    ///
    /// - `MigrationError::InvalidOperation` if the entry is not in the session or has no match.
    /// - `MigrationError::EntryNotFound` if the match no longer exists.
    /// - `MigrationError::Generic` if a store call failed; the entry stays in the session.
    pub async fn copy_now(&self, entry_id: i64) -> Result<(), MigrationError> {
        self.commit_single(entry_id, false).await
    }

    /// Counts for the bulk commit confirmation dialog.
    #[must_use]
    pub fn migrate_dialog(&self, copy: bool) -> MigrateDialog {
        let state = self.state.borrow();
        MigrateDialog {
            copy,
            total: u32::try_from(state.units().len()).unwrap_or(u32::MAX),
            skipped: state.skipped_count(),
        }
    }

    /// The current state of the session.
    #[must_use]
    pub fn snapshot(&self) -> MigrationSnapshot {
        self.state.borrow().snapshot()
    }

    /// Registers the host observer, replacing a previous one.
    pub fn set_observer(&self, observer: Arc<dyn MigrationObserver>) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = Some(observer);
        }
    }

    /// Unregisters the host observer.
    pub fn clear_observer(&self) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = None;
        }
    }
}

impl MigrationController {
    /// Creates a controller from an already assembled [`Library`].
    pub fn with_library(
        config: MigrationProcedureConfig,
        preferences: Arc<MigrationPreferences>,
        sources: Vec<Arc<dyn CatalogSource>>,
        library: Library,
    ) -> Arc<Self> {
        let search_engine = SmartSearchEngine::new(config.extra_search_params.clone());
        let hide_not_found = preferences.hide_not_found_migration();
        let (state, _) = watch::channel(SessionState::new(config));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            preferences,
            sources,
            library,
            search_engine,
            hide_not_found,
            session: CancellationToken::new(),
            started: AtomicBool::new(false),
            state,
            events,
            observer: RwLock::new(None),
            commit_lock: Mutex::new(()),
            commit_token: StdMutex::new(None),
        })
    }

    /// Receives every new session state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Receives session events emitted from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<MigrationEvent> {
        self.events.subscribe()
    }

    async fn load_units(&self, entry_ids: &[i64]) -> Vec<MigrationUnit> {
        let loads = entry_ids.iter().map(|entry_id| async move {
            let entry = match self.library.entries.get_by_id(*entry_id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    crate::warn!("migration_unit.entry_missing entry_id={entry_id}");
                    return None;
                }
                Err(e) => {
                    crate::warn!("migration_unit.load_failed entry_id={entry_id} error={e}");
                    return None;
                }
            };
            let chapter_info = match self.library.chapters.list_by_entry_id(entry.id).await {
                Ok(chapters) => ChapterInfo::from_chapters(&chapters),
                Err(e) => {
                    crate::warn!(
                        "migration_unit.chapters_unavailable entry_id={entry_id} error={e}"
                    );
                    ChapterInfo::default()
                }
            };
            let source_name = self.source(entry.source).map_or_else(
                || format!("{UNKNOWN_SOURCE_NAME} ({})", entry.source),
                |source| source.name(),
            );
            Some(MigrationUnit::new(entry, source_name, chapter_info, &self.session))
        });

        join_all(loads).await.into_iter().flatten().collect()
    }

    /// Installed sources configured as migration candidates, in configured order.
    fn migration_sources(&self) -> Vec<Arc<dyn CatalogSource>> {
        self.preferences
            .migration_sources()
            .into_iter()
            .filter_map(|source_id| self.source(source_id))
            .collect()
    }

    fn source(&self, source_id: i64) -> Option<Arc<dyn CatalogSource>> {
        self.sources
            .iter()
            .find(|source| source.id() == source_id)
            .cloned()
    }

    async fn run_search_pass(&self, entry_ids: &[i64]) -> Result<(), MigrationError> {
        let use_source_with_most = self.preferences.use_source_with_most();
        let smart = self.preferences.smart_migration();
        let sources = self.migration_sources();

        for entry_id in entry_ids {
            if self.session.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            // removed meanwhile, or already searched
            let unit = self.state.borrow().unit(*entry_id).cloned();
            let Some(unit) = unit else {
                continue;
            };
            if unit.search_result != SearchResult::Searching || unit.is_cancelled() {
                continue;
            }

            let entry = &unit.source_entry;
            // own source stays a candidate only when it is the sole one
            let candidates: Vec<Arc<dyn CatalogSource>> = if sources.len() == 1 {
                sources.clone()
            } else {
                sources
                    .iter()
                    .filter(|source| source.id() != entry.source)
                    .cloned()
                    .collect()
            };

            crate::debug!(
                "migration_unit.search_started entry_id={} candidates={} most_chapters={} smart={}",
                entry.id,
                candidates.len(),
                use_source_with_most,
                smart
            );

            let search = async {
                let found = if use_source_with_most {
                    self.search_most_chapters(entry, &candidates, smart).await
                } else {
                    self.search_first_match(entry, &candidates, smart).await
                };
                if let Some(found) = &found {
                    if found.thumbnail_url.is_none() {
                        self.enrich_details(found).await;
                    }
                }
                found
            };

            let outcome = tokio::select! {
                biased;
                () = unit.scope.cancelled() => None,
                found = search => Some(found),
            };
            let Some(found) = outcome else {
                crate::debug!("migration_unit.search_cancelled entry_id={}", entry.id);
                continue;
            };

            let search_result = found
                .as_ref()
                .map_or(SearchResult::NotFound, |target| SearchResult::Result {
                    entry_id: target.id,
                });
            crate::info!(
                "migration_unit.search_finished entry_id={} result={:?} timestamp={}",
                entry.id,
                search_result,
                Utc::now().to_rfc3339()
            );

            // a manual pick that finished meanwhile wins
            let mut applied = false;
            self.publish(|state| {
                state.update_unit(entry.id, |unit| {
                    if unit.search_result == SearchResult::Searching {
                        unit.search_result = search_result;
                        applied = true;
                    }
                });
                applied
            });
            if applied && search_result == SearchResult::NotFound && self.hide_not_found {
                self.take_unit(entry.id);
            }
            self.source_finished();
        }

        Ok(())
    }

    /// Searches every candidate, at most [`MAX_CONCURRENT_SOURCE_SEARCHES`] at once, and keeps
    /// the match with the most chapters. Earlier sources win ties.
    ///
    /// Every match is materialized and synced, including the ones that lose.
    async fn search_most_chapters(
        &self,
        entry: &CatalogEntry,
        candidates: &[Arc<dyn CatalogSource>],
        smart: bool,
    ) -> Option<CatalogEntry> {
        let semaphore = Semaphore::new(MAX_CONCURRENT_SOURCE_SEARCHES);
        let processed = AtomicU32::new(0);
        let total = u32::try_from(candidates.len()).unwrap_or(u32::MAX);

        let attempts = candidates.iter().map(|source| {
            let semaphore = &semaphore;
            let processed = &processed;
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                let outcome = match self
                    .match_with_chapter_count(entry, source.as_ref(), smart)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        crate::debug!(
                            "migration_unit.source_failed entry_id={} source_id={} error={e}",
                            entry.id,
                            source.id()
                        );
                        None
                    }
                };
                let tried = processed.fetch_add(1, Ordering::SeqCst) + 1;
                self.update_progress(entry.id, total, tried);
                outcome
            }
        });

        let mut best: Option<(CatalogEntry, usize)> = None;
        for (candidate, chapter_count) in join_all(attempts).await.into_iter().flatten() {
            if best.as_ref().is_none_or(|(_, top)| chapter_count > *top) {
                best = Some((candidate, chapter_count));
            }
        }
        best.map(|(candidate, _)| candidate)
    }

    async fn match_with_chapter_count(
        &self,
        entry: &CatalogEntry,
        source: &dyn CatalogSource,
        smart: bool,
    ) -> Result<Option<(CatalogEntry, usize)>, MigrationError> {
        let Some(candidate) = self.search_engine.search(source, &entry.title, smart).await else {
            return Ok(None);
        };
        if candidate.url == entry.url && source.id() == entry.source {
            return Ok(None);
        }

        let local = self
            .library
            .entries
            .materialize_from_catalog(candidate, source.id())
            .await?;
        let chapters = source.get_chapter_list(local.to_candidate()).await?;
        let chapter_count = chapters.len();
        self.library
            .chapters
            .sync_from_source(chapters, local.clone(), source.id())
            .await?;
        Ok(Some((local, chapter_count)))
    }

    /// Tries the candidates in order and stops at the first match.
    async fn search_first_match(
        &self,
        entry: &CatalogEntry,
        candidates: &[Arc<dyn CatalogSource>],
        smart: bool,
    ) -> Option<CatalogEntry> {
        let total = u32::try_from(candidates.len()).unwrap_or(u32::MAX);

        for (tried, source) in (1_u32..).zip(candidates) {
            let found = match self.first_match(entry, source.as_ref(), smart).await {
                Ok(found) => found,
                Err(e) => {
                    crate::debug!(
                        "migration_unit.source_failed entry_id={} source_id={} error={e}",
                        entry.id,
                        source.id()
                    );
                    None
                }
            };
            self.update_progress(entry.id, total, tried);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    async fn first_match(
        &self,
        entry: &CatalogEntry,
        source: &dyn CatalogSource,
        smart: bool,
    ) -> Result<Option<CatalogEntry>, MigrationError> {
        let Some(candidate) = self.search_engine.search(source, &entry.title, smart).await else {
            return Ok(None);
        };

        let local = self
            .library
            .entries
            .materialize_from_catalog(candidate, source.id())
            .await?;
        let chapters = match source.get_chapter_list(local.to_candidate()).await {
            Ok(chapters) => chapters,
            Err(e) => {
                crate::error!(
                    "migration_unit.chapter_fetch_failed entry_id={} source_id={} error={e}",
                    local.id,
                    source.id()
                );
                Vec::new()
            }
        };
        self.library
            .chapters
            .sync_from_source(chapters, local.clone(), source.id())
            .await?;
        Ok(Some(local))
    }

    async fn prepare_manual_match(
        &self,
        new_entry_id: i64,
    ) -> Result<CatalogEntry, MigrationError> {
        let picked = self
            .library
            .entries
            .get_by_id(new_entry_id)
            .await?
            .ok_or(MigrationError::EntryNotFound {
                entry_id: new_entry_id,
            })?;
        let source = self
            .source(picked.source)
            .ok_or(SourceError::Unavailable {
                source_id: picked.source,
            })?;

        let local = self
            .library
            .entries
            .materialize_from_catalog(picked.to_candidate(), picked.source)
            .await?;
        let chapters = source.get_chapter_list(local.to_candidate()).await?;
        self.library
            .chapters
            .sync_from_source(chapters, local.clone(), picked.source)
            .await?;
        Ok(local)
    }

    /// Fetches full details of a match and merges them. Failures leave the match as is.
    async fn enrich_details(&self, entry: &CatalogEntry) {
        let Some(source) = self.source(entry.source) else {
            return;
        };
        let merged = match source.get_entry_details(entry.to_candidate()).await {
            Ok(details) => self
                .library
                .entries
                .update_from_source(entry.id, details)
                .await
                .map_err(MigrationError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = merged {
            crate::debug!("migration_unit.details_failed entry_id={} error={e}", entry.id);
        }
    }

    fn update_progress(&self, entry_id: i64, total_sources: u32, sources_tried: u32) {
        self.publish(|state| {
            state.update_unit(entry_id, |unit| {
                unit.progress = SearchProgress {
                    total_sources,
                    sources_tried,
                };
            })
        });
    }

    async fn run_bulk_commit(&self, replace: bool) -> Result<(), MigrationError> {
        let _guard = self.commit_lock.try_lock().map_err(|_| {
            MigrationError::InvalidOperation(
                "Migration is already in progress. Please wait for the current migration to \
                 complete."
                    .to_string(),
            )
        })?;

        let token = self.session.child_token();
        if let Ok(mut slot) = self.commit_token.lock() {
            *slot = Some(token.clone());
        }

        let result = self.commit_units(replace, &token).await;

        if let Ok(mut slot) = self.commit_token.lock() {
            *slot = None;
        }
        self.publish(|state| state.commit_progress.take().is_some());

        if result.is_ok() {
            self.emit(MigrationEvent::NavigateOut);
        }
        result
    }

    async fn commit_units(
        &self,
        replace: bool,
        token: &CancellationToken,
    ) -> Result<(), MigrationError> {
        let run_start_time = Utc::now();
        let flags = self.preferences.migrate_flags();
        let units = self.state.borrow().units().to_vec();
        let total = units.len();

        crate::info!(
            "migration_commit.started total={} replace={} flags={:#b} timestamp={}",
            total,
            replace,
            flags,
            run_start_time.to_rfc3339()
        );
        self.publish(|state| {
            state.commit_progress = Some(0.0);
            true
        });

        let mut committed = 0_usize;
        for (index, unit) in units.iter().enumerate() {
            if token.is_cancelled() {
                crate::warn!(
                    "migration_commit.cancelled committed={} remaining={} timestamp={}",
                    committed,
                    total - index,
                    Utc::now().to_rfc3339()
                );
                return Err(MigrationError::Cancelled);
            }

            match self.commit_unit(unit, flags, replace).await {
                Ok(true) => {
                    committed += 1;
                    self.take_unit(unit.entry_id());
                }
                Ok(false) => {}
                Err(e) => crate::warn!(
                    "migration_commit.unit_failed entry_id={} error={} timestamp={}",
                    unit.entry_id(),
                    e.to_generic_message(),
                    Utc::now().to_rfc3339()
                ),
            }

            #[allow(clippy::cast_precision_loss)]
            let progress = (index + 1) as f64 / total as f64;
            self.publish(|state| {
                state.commit_progress = Some(progress);
                true
            });
            self.emit(MigrationEvent::CommitProgress { progress });
        }

        crate::info!(
            "migration_commit.completed total={} committed={} duration_ms={} timestamp={}",
            total,
            committed,
            (Utc::now() - run_start_time).num_milliseconds(),
            Utc::now().to_rfc3339()
        );
        Ok(())
    }

    /// Commits a unit whose match still exists. Returns `false` when there was nothing to commit.
    async fn commit_unit(
        &self,
        unit: &MigrationUnit,
        flags: i32,
        replace: bool,
    ) -> anyhow::Result<bool> {
        let Some(target_id) = unit.search_result.target_id() else {
            return Ok(false);
        };
        let Some(target) = self
            .library
            .entries
            .get_by_id(target_id)
            .await
            .context("load migration target")?
        else {
            return Ok(false);
        };

        transfer_entry(&self.library, &unit.source_entry, &target, flags, replace)
            .await
            .with_context(|| format!("transfer entry {} -> {}", unit.entry_id(), target.id))?;
        Ok(true)
    }

    async fn commit_single(&self, entry_id: i64, replace: bool) -> Result<(), MigrationError> {
        self.publish(|state| {
            state.manual_migrations += 1;
            true
        });

        let unit = self
            .state
            .borrow()
            .unit(entry_id)
            .cloned()
            .ok_or_else(|| not_in_session(entry_id))?;
        let target_id = unit.search_result.target_id().ok_or_else(|| {
            MigrationError::InvalidOperation(format!("Entry {entry_id} has no match to migrate to"))
        })?;
        let target = self
            .library
            .entries
            .get_by_id(target_id)
            .await?
            .ok_or(MigrationError::EntryNotFound {
                entry_id: target_id,
            })?;

        let flags = self.preferences.migrate_flags();
        MigrationError::from_anyhow_result_with_prefix(
            transfer_entry(&self.library, &unit.source_entry, &target, flags, replace).await,
            if replace { "migrate_now" } else { "copy_now" },
        )?;

        crate::info!(
            "migration_unit.committed entry_id={} target_id={} replace={} timestamp={}",
            entry_id,
            target_id,
            replace,
            Utc::now().to_rfc3339()
        );
        self.take_unit(entry_id);
        if self.state.borrow().is_drained() {
            self.emit(MigrationEvent::NavigateOut);
        }
        Ok(())
    }

    /// Removes a unit, cancels its search and recomputes the counters without emitting
    /// events. Returns `false` when the entry was already removed.
    fn take_unit(&self, entry_id: i64) -> bool {
        self.publish(|state| {
            let removed = state.remove_unit(entry_id);
            if removed {
                state.recompute();
            }
            removed
        })
    }

    fn source_finished(&self) {
        self.publish(|state| {
            state.recompute();
            true
        });
        if self.state.borrow().is_drained() {
            self.emit(MigrationEvent::NavigateOut);
        }
    }

    /// Applies `mutate` atomically and notifies the observer when it reports a change.
    fn publish(&self, mutate: impl FnOnce(&mut SessionState) -> bool) -> bool {
        let changed = self.state.send_if_modified(mutate);
        if changed {
            if let Some(observer) = self.current_observer() {
                let snapshot = self.state.borrow().snapshot();
                observer.on_state_changed(snapshot);
            }
        }
        changed
    }

    fn emit(&self, event: MigrationEvent) {
        // no subscribers is fine
        let _ = self.events.send(event.clone());
        if let Some(observer) = self.current_observer() {
            observer.on_event(event);
        }
    }

    fn current_observer(&self) -> Option<Arc<dyn MigrationObserver>> {
        self.observer.read().ok().and_then(|slot| slot.clone())
    }
}

fn not_in_session(entry_id: i64) -> MigrationError {
    MigrationError::InvalidOperation(format!("Entry {entry_id} is not part of this migration"))
}
