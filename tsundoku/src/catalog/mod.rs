//! Records exchanged with the host app and the collaborator traits it implements.
//!
//! The engine never owns catalog data. It reads entries, chapters, history, categories and
//! tracking links through the store traits in [`store`], talks to content catalogs through
//! [`CatalogSource`] and copies covers through [`CoverCache`].

mod cover_cache;
mod source;
mod store;

pub use cover_cache::CoverCache;
pub use source::{CatalogSource, SourceError};
pub use store::{
    CategoryStore, ChapterStore, EntryStore, HistoryStore, StoreError, TrackStore,
};

/// How the library updater treats an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, uniffi::Enum)]
pub enum UpdateStrategy {
    /// Chapters are refreshed on every library update.
    #[default]
    AlwaysUpdate,
    /// Chapters are fetched once and never refreshed.
    OnlyFetchOnce,
}

/// A library row linked to one catalog by `(source, url)`.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct CatalogEntry {
    /// Local id.
    pub id: i64,
    /// Id of the catalog source the entry belongs to.
    pub source: i64,
    /// Catalog-relative locator.
    pub url: String,
    /// Display title.
    pub title: String,
    /// Preview image, absent until details were fetched.
    pub thumbnail_url: Option<String>,
    /// Whether the entry is in the user's library.
    pub favorite: bool,
    /// Epoch millis of when the entry was added to the library.
    pub date_added: i64,
    /// Opaque per-entry chapter list display settings.
    pub chapter_flags: i64,
    /// Opaque per-entry reader settings.
    pub viewer_flags: i64,
    /// Library update behaviour.
    pub update_strategy: UpdateStrategy,
}

impl CatalogEntry {
    /// The catalog-side view of the entry, as passed back to its [`CatalogSource`].
    #[must_use]
    pub fn to_candidate(&self) -> CatalogCandidate {
        CatalogCandidate {
            url: self.url.clone(),
            title: self.title.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            ..CatalogCandidate::default()
        }
    }
}

/// Partial update of a [`CatalogEntry`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct EntryUpdate {
    /// Id of the entry to update.
    pub id: i64,
    /// New favorite flag.
    pub favorite: Option<bool>,
    /// New date added, epoch millis.
    pub date_added: Option<i64>,
    /// New chapter display settings.
    pub chapter_flags: Option<i64>,
    /// New reader settings.
    pub viewer_flags: Option<i64>,
}

impl EntryUpdate {
    /// An update for `id` that changes nothing yet.
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// A catalog search result that has not been materialized into the library.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct CatalogCandidate {
    /// Catalog-relative locator.
    pub url: String,
    /// Title as the catalog lists it.
    pub title: String,
    /// Preview image.
    pub thumbnail_url: Option<String>,
    /// Author.
    pub author: Option<String>,
    /// Artist.
    pub artist: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Comma separated genres.
    pub genre: Option<String>,
    /// Publication status as the catalog reports it, `0` when unknown.
    pub status: i32,
}

/// A stored chapter of an entry.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct Chapter {
    /// Local id.
    pub id: i64,
    /// Owning entry.
    pub entry_id: i64,
    /// Catalog-relative locator.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Parsed chapter number, negative when it could not be recognized.
    pub chapter_number: f64,
    /// Whether the chapter was read.
    pub read: bool,
    /// Whether the chapter is bookmarked.
    pub bookmark: bool,
    /// Epoch millis the chapter was first fetched.
    pub date_fetch: i64,
}

impl Chapter {
    /// Whether the chapter number was recognized.
    #[must_use]
    pub fn is_recognized_number(&self) -> bool {
        self.chapter_number >= 0.0
    }
}

/// Partial update of a [`Chapter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct ChapterUpdate {
    /// Id of the chapter to update.
    pub id: i64,
    /// New read flag.
    pub read: Option<bool>,
    /// New bookmark flag.
    pub bookmark: Option<bool>,
    /// New fetch date.
    pub date_fetch: Option<i64>,
}

/// A chapter as returned by a catalog, before it is synced into storage.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct SourceChapter {
    /// Catalog-relative locator.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Parsed chapter number, negative when unknown.
    pub chapter_number: f64,
    /// Epoch millis of the upload, `0` when unknown.
    pub date_upload: i64,
}

/// Reading history of one chapter.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct HistoryRecord {
    /// The chapter this history belongs to.
    pub chapter_id: i64,
    /// Epoch millis of the last read, if ever read.
    pub read_at: Option<i64>,
    /// Accumulated reading time in millis.
    pub read_duration: i64,
}

/// Upsert of a chapter's history.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct HistoryUpdate {
    /// The chapter this history belongs to.
    pub chapter_id: i64,
    /// Epoch millis of the last read.
    pub read_at: i64,
    /// Reading time to add, in millis.
    pub session_read_duration: i64,
}

/// A user category.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct Category {
    /// Local id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Sort position.
    pub order: i64,
}

/// Link between an entry and a remote tracking service.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct TrackLink {
    /// Local id, ignored on insert.
    pub id: i64,
    /// Entry the link belongs to.
    pub entry_id: i64,
    /// Tracking service id.
    pub service_id: i64,
    /// Id of the series on the service.
    pub remote_id: i64,
    /// Id of the user's list entry on the service, if any.
    pub library_id: Option<i64>,
    /// Title on the service.
    pub title: String,
    /// Last chapter read as reported to the service.
    pub last_chapter_read: f64,
    /// Chapter count on the service.
    pub total_chapters: i64,
    /// Service specific reading status.
    pub status: i64,
    /// Service specific score.
    pub score: f64,
    /// Url of the series on the service.
    pub remote_url: String,
    /// Epoch millis the user started reading.
    pub started_reading_date: i64,
    /// Epoch millis the user finished reading.
    pub finished_reading_date: i64,
}
