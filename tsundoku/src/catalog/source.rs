use crate::catalog::{CatalogCandidate, SourceChapter};

/// Failures reported by a [`CatalogSource`].
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum SourceError {
    /// The request did not complete.
    #[error("network error: {message}")]
    Network {
        /// Transport error description.
        message: String,
    },
    /// The catalog answered with something that could not be parsed.
    #[error("parse error: {message}")]
    Parse {
        /// Parser error description.
        message: String,
    },
    /// The source is not installed or disabled.
    #[error("source {source_id} is unavailable")]
    Unavailable {
        /// Id of the missing source.
        source_id: i64,
    },
    /// An unexpected error occurred in the foreign callback
    #[error("unexpected error in foreign callback: {reason}")]
    UnexpectedUniFFICallbackError {
        /// Reason reported by UniFFI.
        reason: String,
    },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for SourceError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// A content catalog (an installed extension) the engine can search.
///
/// All network access is done by the host; implementations map transport and parse
/// failures onto [`SourceError`]. The engine treats every failure of these calls as
/// "nothing found" for that source.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// Stable id of the source.
    fn id(&self) -> i64;

    /// Display name.
    fn name(&self) -> String;

    /// Language code, e.g. `en`, or `all` for multi-language sources.
    fn lang(&self) -> String;

    /// Runs the catalog's standard search.
    ///
    /// # Errors
    /// Any [`SourceError`] the host reports.
    async fn search_catalog(&self, query: String) -> Result<Vec<CatalogCandidate>, SourceError>;

    /// Fetches the chapter list of a catalog entry.
    ///
    /// # Errors
    /// Any [`SourceError`] the host reports.
    async fn get_chapter_list(
        &self,
        candidate: CatalogCandidate,
    ) -> Result<Vec<SourceChapter>, SourceError>;

    /// Fetches the full details (cover, author, description...) of a catalog entry.
    ///
    /// # Errors
    /// Any [`SourceError`] the host reports.
    async fn get_entry_details(
        &self,
        candidate: CatalogCandidate,
    ) -> Result<CatalogCandidate, SourceError>;
}
