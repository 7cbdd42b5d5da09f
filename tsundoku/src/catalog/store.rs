use crate::catalog::{
    CatalogCandidate, CatalogEntry, Category, Chapter, ChapterUpdate, EntryUpdate,
    HistoryRecord, HistoryUpdate, SourceChapter, TrackLink,
};

/// Failures reported by the persistence layer.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum StoreError {
    /// A referenced row does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing row.
        what: String,
    },
    /// The database rejected the operation.
    #[error("database error: {message}")]
    Database {
        /// Driver error description.
        message: String,
    },
    /// An unexpected error occurred in the foreign callback
    #[error("unexpected error in foreign callback: {reason}")]
    UnexpectedUniFFICallbackError {
        /// Reason reported by UniFFI.
        reason: String,
    },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for StoreError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// Library entries.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait EntryStore: Send + Sync {
    /// Loads an entry, `None` when it does not exist.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn get_by_id(&self, id: i64) -> Result<Option<CatalogEntry>, StoreError>;

    /// Upserts a candidate keyed by `(source_id, candidate.url)` and returns the stored entry.
    /// Calling it twice for the same candidate returns the same entry.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn materialize_from_catalog(
        &self,
        candidate: CatalogCandidate,
        source_id: i64,
    ) -> Result<CatalogEntry, StoreError>;

    /// Applies all updates atomically.
    ///
    /// # Errors
    /// [`StoreError`] on database failure, in which case nothing was written.
    async fn update_batch(&self, updates: Vec<EntryUpdate>) -> Result<(), StoreError>;

    /// Merges freshly fetched catalog details (cover, author...) into an entry.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn update_from_source(
        &self,
        entry_id: i64,
        details: CatalogCandidate,
    ) -> Result<(), StoreError>;
}

/// Chapters of library entries.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait ChapterStore: Send + Sync {
    /// Lists the stored chapters of an entry.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn list_by_entry_id(&self, entry_id: i64) -> Result<Vec<Chapter>, StoreError>;

    /// Reconciles a fetched chapter list against the stored chapters of `entry`.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn sync_from_source(
        &self,
        fetched: Vec<SourceChapter>,
        entry: CatalogEntry,
        source_id: i64,
    ) -> Result<(), StoreError>;

    /// Applies all updates atomically.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn update_batch(&self, updates: Vec<ChapterUpdate>) -> Result<(), StoreError>;
}

/// Reading history.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Lists the history of every chapter of an entry.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn list_by_entry_id(&self, entry_id: i64) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Inserts or merges history rows.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn upsert_batch(&self, updates: Vec<HistoryUpdate>) -> Result<(), StoreError>;
}

/// Category membership.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait CategoryStore: Send + Sync {
    /// Categories the entry currently belongs to.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn list_for_entry(&self, entry_id: i64) -> Result<Vec<Category>, StoreError>;

    /// Replaces the entry's categories with exactly `category_ids`.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn set_for_entry(&self, entry_id: i64, category_ids: Vec<i64>)
        -> Result<(), StoreError>;
}

/// Tracking service links.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait TrackStore: Send + Sync {
    /// Links of an entry.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn list_for_entry(&self, entry_id: i64) -> Result<Vec<TrackLink>, StoreError>;

    /// Removes the entry's link to one service.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn delete_for_service(&self, entry_id: i64, service_id: i64) -> Result<(), StoreError>;

    /// Inserts links. Their `id` is ignored.
    ///
    /// # Errors
    /// [`StoreError`] on database failure.
    async fn insert_batch(&self, links: Vec<TrackLink>) -> Result<(), StoreError>;
}
