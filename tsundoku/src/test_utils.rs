//! In-memory collaborators for tests and tooling.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::catalog::{
    CatalogCandidate, CatalogEntry, CatalogSource, Category, CategoryStore, Chapter,
    ChapterStore, ChapterUpdate, CoverCache, EntryStore, EntryUpdate, HistoryRecord,
    HistoryStore, HistoryUpdate, SourceChapter, SourceError, StoreError, TrackLink, TrackStore,
    UpdateStrategy,
};
use crate::migration::{Library, MigrationEvent, MigrationObserver, MigrationSnapshot};
use crate::primitives::key_value_store::{DeviceKeyValueStore, KeyValueStoreError};

/// In-memory implementation of `DeviceKeyValueStore` for testing purposes
#[derive(Default)]
pub struct InMemoryDeviceKeyValueStore {
    store: Mutex<HashMap<String, String>>,
}

impl InMemoryDeviceKeyValueStore {
    /// Creates a new empty in-memory key-value store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceKeyValueStore for InMemoryDeviceKeyValueStore {
    fn get(&self, key: String) -> Result<String, KeyValueStoreError> {
        let value = self.store.lock().unwrap().get(&key).cloned();
        value.ok_or(KeyValueStoreError::KeyNotFound)
    }

    fn set(&self, key: String, value: String) -> Result<(), KeyValueStoreError> {
        self.store.lock().unwrap().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: String) -> Result<(), KeyValueStoreError> {
        self.store
            .lock()
            .unwrap()
            .remove(&key)
            .map(|_| ())
            .ok_or(KeyValueStoreError::KeyNotFound)
    }
}

/// A favorited entry with neutral defaults.
#[must_use]
pub fn sample_entry(id: i64, source: i64, title: &str) -> CatalogEntry {
    CatalogEntry {
        id,
        source,
        url: format!("/series/{id}"),
        title: title.to_string(),
        thumbnail_url: Some(format!("https://covers.example/{id}.jpg")),
        favorite: true,
        date_added: 0,
        chapter_flags: 0,
        viewer_flags: 0,
        update_strategy: UpdateStrategy::AlwaysUpdate,
    }
}

/// An unread chapter.
#[must_use]
pub fn chapter(id: i64, entry_id: i64, chapter_number: f64) -> Chapter {
    Chapter {
        id,
        entry_id,
        url: format!("/chapter/{id}"),
        name: format!("Chapter {chapter_number}"),
        chapter_number,
        read: false,
        bookmark: false,
        date_fetch: 0,
    }
}

/// A tracking link of `entry_id` on `service_id`.
#[must_use]
pub fn sample_track(entry_id: i64, service_id: i64) -> TrackLink {
    TrackLink {
        id: 0,
        entry_id,
        service_id,
        remote_id: 9_000 + service_id,
        library_id: None,
        title: "tracked".to_string(),
        last_chapter_read: 3.0,
        total_chapters: 10,
        status: 1,
        score: 8.0,
        remote_url: format!("https://tracker.example/{service_id}"),
        started_reading_date: 0,
        finished_reading_date: 0,
    }
}

/// A search hit without details.
#[must_use]
pub fn candidate(url: &str, title: &str) -> CatalogCandidate {
    CatalogCandidate {
        url: url.to_string(),
        title: title.to_string(),
        ..CatalogCandidate::default()
    }
}

#[derive(Default)]
struct LibraryRows {
    entries: BTreeMap<i64, CatalogEntry>,
    chapters: BTreeMap<i64, Chapter>,
    history: BTreeMap<i64, HistoryRecord>,
    categories: HashMap<i64, Vec<Category>>,
    tracks: Vec<TrackLink>,
    next_entry_id: i64,
    next_chapter_id: i64,
    next_track_id: i64,
    failing_entry_updates: HashSet<i64>,
    entry_update_batches: usize,
    materialize_calls: usize,
    details_merged: Vec<i64>,
}

/// Every store trait over one set of in-memory tables.
pub struct InMemoryLibrary {
    rows: Mutex<LibraryRows>,
}

impl InMemoryLibrary {
    /// An empty library. Materialized entries get ids from 1000.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(LibraryRows {
                next_entry_id: 1_000,
                next_chapter_id: 10_000,
                next_track_id: 1,
                ..LibraryRows::default()
            }),
        })
    }

    /// The same library behind every collaborator of a session.
    #[must_use]
    pub fn as_library(self: &Arc<Self>, cover_cache: Arc<InMemoryCoverCache>) -> Library {
        Library {
            entries: self.clone(),
            chapters: self.clone(),
            history: self.clone(),
            categories: self.clone(),
            tracks: self.clone(),
            cover_cache,
        }
    }

    /// Stores an entry as is.
    pub fn insert_entry(&self, entry: CatalogEntry) -> CatalogEntry {
        self.rows.lock().unwrap().entries.insert(entry.id, entry.clone());
        entry
    }

    /// Stores a chapter as is.
    pub fn insert_chapter(&self, chapter: Chapter) {
        self.rows.lock().unwrap().chapters.insert(chapter.id, chapter);
    }

    /// Stores a history row.
    pub fn insert_history(&self, record: HistoryRecord) {
        self.rows.lock().unwrap().history.insert(record.chapter_id, record);
    }

    /// Stores a tracking link.
    pub fn insert_track(&self, link: TrackLink) {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.next_track_id;
        rows.next_track_id += 1;
        rows.tracks.push(TrackLink { id, ..link });
    }

    /// Replaces the categories of an entry.
    pub fn set_categories(&self, entry_id: i64, categories: Vec<Category>) {
        self.rows.lock().unwrap().categories.insert(entry_id, categories);
    }

    /// Makes every entry update batch touching `entry_id` fail.
    pub fn fail_entry_updates_for(&self, entry_id: i64) {
        self.rows.lock().unwrap().failing_entry_updates.insert(entry_id);
    }

    /// The stored entry.
    #[must_use]
    pub fn entry(&self, id: i64) -> Option<CatalogEntry> {
        self.rows.lock().unwrap().entries.get(&id).cloned()
    }

    /// The entry stored for `(source, url)`.
    #[must_use]
    pub fn entry_by_url(&self, source: i64, url: &str) -> Option<CatalogEntry> {
        self.rows
            .lock()
            .unwrap()
            .entries
            .values()
            .find(|entry| entry.source == source && entry.url == url)
            .cloned()
    }

    /// The stored chapter.
    #[must_use]
    pub fn chapter(&self, id: i64) -> Option<Chapter> {
        self.rows.lock().unwrap().chapters.get(&id).cloned()
    }

    /// Chapters of an entry ordered by id.
    #[must_use]
    pub fn chapters_for(&self, entry_id: i64) -> Vec<Chapter> {
        self.rows
            .lock()
            .unwrap()
            .chapters
            .values()
            .filter(|chapter| chapter.entry_id == entry_id)
            .cloned()
            .collect()
    }

    /// History of a chapter.
    #[must_use]
    pub fn history_for_chapter(&self, chapter_id: i64) -> Option<HistoryRecord> {
        self.rows.lock().unwrap().history.get(&chapter_id).cloned()
    }

    /// Category ids of an entry.
    #[must_use]
    pub fn category_ids(&self, entry_id: i64) -> Vec<i64> {
        self.rows
            .lock()
            .unwrap()
            .categories
            .get(&entry_id)
            .map(|categories| categories.iter().map(|category| category.id).collect())
            .unwrap_or_default()
    }

    /// Tracking links of an entry.
    #[must_use]
    pub fn tracks_for(&self, entry_id: i64) -> Vec<TrackLink> {
        self.rows
            .lock()
            .unwrap()
            .tracks
            .iter()
            .filter(|link| link.entry_id == entry_id)
            .cloned()
            .collect()
    }

    /// Number of successful entry update batches.
    #[must_use]
    pub fn entry_update_batches(&self) -> usize {
        self.rows.lock().unwrap().entry_update_batches
    }

    /// Number of `materialize_from_catalog` calls.
    #[must_use]
    pub fn materialize_calls(&self) -> usize {
        self.rows.lock().unwrap().materialize_calls
    }

    /// Entry ids that received fetched details, in call order.
    #[must_use]
    pub fn details_merged(&self) -> Vec<i64> {
        self.rows.lock().unwrap().details_merged.clone()
    }
}

#[async_trait::async_trait]
impl EntryStore for InMemoryLibrary {
    async fn get_by_id(&self, id: i64) -> Result<Option<CatalogEntry>, StoreError> {
        Ok(self.entry(id))
    }

    async fn materialize_from_catalog(
        &self,
        candidate: CatalogCandidate,
        source_id: i64,
    ) -> Result<CatalogEntry, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        rows.materialize_calls += 1;
        if let Some(existing) = rows
            .entries
            .values()
            .find(|entry| entry.source == source_id && entry.url == candidate.url)
        {
            return Ok(existing.clone());
        }

        let id = rows.next_entry_id;
        rows.next_entry_id += 1;
        let entry = CatalogEntry {
            id,
            source: source_id,
            url: candidate.url,
            title: candidate.title,
            thumbnail_url: candidate.thumbnail_url,
            favorite: false,
            date_added: 0,
            chapter_flags: 0,
            viewer_flags: 0,
            update_strategy: UpdateStrategy::AlwaysUpdate,
        };
        rows.entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn update_batch(&self, updates: Vec<EntryUpdate>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(update) = updates
            .iter()
            .find(|update| rows.failing_entry_updates.contains(&update.id))
        {
            return Err(StoreError::Database {
                message: format!("entry {} is locked", update.id),
            });
        }

        for update in updates {
            let Some(entry) = rows.entries.get_mut(&update.id) else {
                return Err(StoreError::NotFound {
                    what: format!("entry {}", update.id),
                });
            };
            if let Some(favorite) = update.favorite {
                entry.favorite = favorite;
            }
            if let Some(date_added) = update.date_added {
                entry.date_added = date_added;
            }
            if let Some(chapter_flags) = update.chapter_flags {
                entry.chapter_flags = chapter_flags;
            }
            if let Some(viewer_flags) = update.viewer_flags {
                entry.viewer_flags = viewer_flags;
            }
        }
        rows.entry_update_batches += 1;
        Ok(())
    }

    async fn update_from_source(
        &self,
        entry_id: i64,
        details: CatalogCandidate,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let entry = rows.entries.get_mut(&entry_id).ok_or(StoreError::NotFound {
            what: format!("entry {entry_id}"),
        })?;
        if details.thumbnail_url.is_some() {
            entry.thumbnail_url = details.thumbnail_url;
        }
        rows.details_merged.push(entry_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChapterStore for InMemoryLibrary {
    async fn list_by_entry_id(&self, entry_id: i64) -> Result<Vec<Chapter>, StoreError> {
        Ok(self.chapters_for(entry_id))
    }

    async fn sync_from_source(
        &self,
        fetched: Vec<SourceChapter>,
        entry: CatalogEntry,
        _source_id: i64,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for source_chapter in fetched {
            let known = rows
                .chapters
                .values()
                .any(|stored| stored.entry_id == entry.id && stored.url == source_chapter.url);
            if known {
                continue;
            }
            let id = rows.next_chapter_id;
            rows.next_chapter_id += 1;
            rows.chapters.insert(
                id,
                Chapter {
                    id,
                    entry_id: entry.id,
                    url: source_chapter.url,
                    name: source_chapter.name,
                    chapter_number: source_chapter.chapter_number,
                    read: false,
                    bookmark: false,
                    date_fetch: source_chapter.date_upload,
                },
            );
        }
        Ok(())
    }

    async fn update_batch(&self, updates: Vec<ChapterUpdate>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for update in updates {
            let Some(chapter) = rows.chapters.get_mut(&update.id) else {
                continue;
            };
            if let Some(read) = update.read {
                chapter.read = read;
            }
            if let Some(bookmark) = update.bookmark {
                chapter.bookmark = bookmark;
            }
            if let Some(date_fetch) = update.date_fetch {
                chapter.date_fetch = date_fetch;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryLibrary {
    async fn list_by_entry_id(&self, entry_id: i64) -> Result<Vec<HistoryRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .history
            .values()
            .filter(|record| {
                rows.chapters
                    .get(&record.chapter_id)
                    .is_some_and(|chapter| chapter.entry_id == entry_id)
            })
            .cloned()
            .collect())
    }

    async fn upsert_batch(&self, updates: Vec<HistoryUpdate>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for update in updates {
            let record = rows
                .history
                .entry(update.chapter_id)
                .or_insert(HistoryRecord {
                    chapter_id: update.chapter_id,
                    read_at: None,
                    read_duration: 0,
                });
            record.read_at = Some(update.read_at);
            record.read_duration += update.session_read_duration;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CategoryStore for InMemoryLibrary {
    async fn list_for_entry(&self, entry_id: i64) -> Result<Vec<Category>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .categories
            .get(&entry_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_for_entry(
        &self,
        entry_id: i64,
        category_ids: Vec<i64>,
    ) -> Result<(), StoreError> {
        let categories = category_ids
            .into_iter()
            .zip(0_i64..)
            .map(|(id, order)| Category {
                id,
                name: format!("category {id}"),
                order,
            })
            .collect();
        self.set_categories(entry_id, categories);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TrackStore for InMemoryLibrary {
    async fn list_for_entry(&self, entry_id: i64) -> Result<Vec<TrackLink>, StoreError> {
        Ok(self.tracks_for(entry_id))
    }

    async fn delete_for_service(&self, entry_id: i64, service_id: i64) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .tracks
            .retain(|link| !(link.entry_id == entry_id && link.service_id == service_id));
        Ok(())
    }

    async fn insert_batch(&self, links: Vec<TrackLink>) -> Result<(), StoreError> {
        for link in links {
            self.insert_track(link);
        }
        Ok(())
    }
}

/// Custom covers kept in a map.
#[derive(Default)]
pub struct InMemoryCoverCache {
    covers: Mutex<HashMap<i64, Vec<u8>>>,
}

impl InMemoryCoverCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the custom cover of an entry.
    pub fn put(&self, entry_id: i64, bytes: Vec<u8>) {
        self.covers.lock().unwrap().insert(entry_id, bytes);
    }

    /// The custom cover of an entry.
    #[must_use]
    pub fn get(&self, entry_id: i64) -> Option<Vec<u8>> {
        self.covers.lock().unwrap().get(&entry_id).cloned()
    }
}

#[async_trait::async_trait]
impl CoverCache for InMemoryCoverCache {
    async fn has_custom_cover(&self, entry: CatalogEntry) -> bool {
        self.covers.lock().unwrap().contains_key(&entry.id)
    }

    async fn read_custom_cover(&self, entry_id: i64) -> Result<Vec<u8>, StoreError> {
        self.get(entry_id).ok_or(StoreError::NotFound {
            what: format!("cover of entry {entry_id}"),
        })
    }

    async fn write_custom_cover(
        &self,
        entry: CatalogEntry,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.put(entry.id, bytes);
        Ok(())
    }
}

/// Counts calls running at the same time.
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    /// A gauge at zero, ready to share.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(running, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of calls seen at once.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// A scripted catalog that records what it was asked.
pub struct FakeCatalogSource {
    id: i64,
    name: String,
    lang: String,
    results: HashMap<String, Vec<CatalogCandidate>>,
    fallback_results: Vec<CatalogCandidate>,
    chapters: HashMap<String, Vec<SourceChapter>>,
    search_failure: Option<String>,
    chapters_fail: bool,
    details_fail: bool,
    details_thumbnail: Option<String>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
    gauge: Arc<ConcurrencyGauge>,
    details_calls: AtomicUsize,
}

impl FakeCatalogSource {
    /// A source that finds nothing.
    #[must_use]
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            lang: "en".to_string(),
            results: HashMap::new(),
            fallback_results: Vec::new(),
            chapters: HashMap::new(),
            search_failure: None,
            chapters_fail: false,
            details_fail: false,
            details_thumbnail: None,
            delay: None,
            queries: Mutex::new(Vec::new()),
            gauge: Arc::new(ConcurrencyGauge::default()),
            details_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the language code.
    #[must_use]
    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_string();
        self
    }

    /// Answers `query` with `results`.
    #[must_use]
    pub fn with_results(mut self, query: &str, results: Vec<CatalogCandidate>) -> Self {
        self.results.insert(query.to_string(), results);
        self
    }

    /// Answers every query without a scripted answer with `results`.
    #[must_use]
    pub fn with_fallback_results(mut self, results: Vec<CatalogCandidate>) -> Self {
        self.fallback_results = results;
        self
    }

    /// Serves `count` chapters numbered from 1 for `url`.
    #[must_use]
    pub fn with_chapters(mut self, url: &str, count: u32) -> Self {
        let chapters = (1..=count)
            .map(|number| SourceChapter {
                url: format!("{url}/{number}"),
                name: format!("Chapter {number}"),
                chapter_number: f64::from(number),
                date_upload: 0,
            })
            .collect();
        self.chapters.insert(url.to_string(), chapters);
        self
    }

    /// Fails every search with a network error.
    #[must_use]
    pub fn failing_search(mut self, message: &str) -> Self {
        self.search_failure = Some(message.to_string());
        self
    }

    /// Fails every chapter list request.
    #[must_use]
    pub fn failing_chapters(mut self) -> Self {
        self.chapters_fail = true;
        self
    }

    /// Fails every details request.
    #[must_use]
    pub fn failing_details(mut self) -> Self {
        self.details_fail = true;
        self
    }

    /// Details requests return this thumbnail.
    #[must_use]
    pub fn with_details_thumbnail(mut self, thumbnail_url: &str) -> Self {
        self.details_thumbnail = Some(thumbnail_url.to_string());
        self
    }

    /// Every search takes `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Measures searches with `gauge`, which may be shared between sources.
    #[must_use]
    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    /// Queries received so far.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Number of searches received.
    #[must_use]
    pub fn search_calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    /// Number of details requests.
    #[must_use]
    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CatalogSource for FakeCatalogSource {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn lang(&self) -> String {
        self.lang.clone()
    }

    async fn search_catalog(&self, query: String) -> Result<Vec<CatalogCandidate>, SourceError> {
        self.queries.lock().unwrap().push(query.clone());
        self.gauge.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.leave();

        if let Some(message) = &self.search_failure {
            return Err(SourceError::Network {
                message: message.clone(),
            });
        }
        Ok(self
            .results
            .get(&query)
            .cloned()
            .unwrap_or_else(|| self.fallback_results.clone()))
    }

    async fn get_chapter_list(
        &self,
        candidate: CatalogCandidate,
    ) -> Result<Vec<SourceChapter>, SourceError> {
        if self.chapters_fail {
            return Err(SourceError::Parse {
                message: format!("no chapter list at {}", candidate.url),
            });
        }
        Ok(self.chapters.get(&candidate.url).cloned().unwrap_or_default())
    }

    async fn get_entry_details(
        &self,
        candidate: CatalogCandidate,
    ) -> Result<CatalogCandidate, SourceError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        if self.details_fail {
            return Err(SourceError::Network {
                message: format!("details of {} timed out", candidate.url),
            });
        }
        Ok(CatalogCandidate {
            thumbnail_url: self.details_thumbnail.clone(),
            ..candidate
        })
    }
}

type EventHook = Box<dyn Fn(&MigrationEvent) + Send + Sync>;

/// Records everything a session reports.
#[derive(Default)]
pub struct RecordingObserver {
    snapshots: Mutex<Vec<MigrationSnapshot>>,
    events: Mutex<Vec<MigrationEvent>>,
    hook: Option<EventHook>,
}

impl RecordingObserver {
    /// An observer that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer that also runs `hook` for every event.
    #[must_use]
    pub fn with_hook(hook: impl Fn(&MigrationEvent) + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().unwrap().clone()
    }

    /// The most recent snapshot.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<MigrationSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }

    /// Number of snapshots received.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

impl MigrationObserver for RecordingObserver {
    fn on_state_changed(&self, snapshot: MigrationSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    fn on_event(&self, event: MigrationEvent) {
        if let Some(hook) = &self.hook {
            hook(&event);
        }
        self.events.lock().unwrap().push(event);
    }
}
