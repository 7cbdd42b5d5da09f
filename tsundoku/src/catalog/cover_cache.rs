use crate::catalog::{CatalogEntry, StoreError};

/// On-device cache of user-chosen covers.
///
/// Covers are small images, so they cross the FFI boundary as whole byte buffers.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait CoverCache: Send + Sync {
    /// Whether the user replaced the catalog cover of `entry` with their own.
    async fn has_custom_cover(&self, entry: CatalogEntry) -> bool;

    /// Reads the custom cover of an entry.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] when there is no custom cover.
    async fn read_custom_cover(&self, entry_id: i64) -> Result<Vec<u8>, StoreError>;

    /// Stores `bytes` as the custom cover of `entry`.
    ///
    /// # Errors
    /// [`StoreError`] when the cache could not be written.
    async fn write_custom_cover(&self, entry: CatalogEntry, bytes: Vec<u8>)
        -> Result<(), StoreError>;
}
