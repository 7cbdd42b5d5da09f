use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogEntry, Chapter};

/// Outcome of the search for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SearchResult {
    /// A search pass is running or has not reached this entry yet.
    Searching,
    /// No candidate source had a match.
    NotFound,
    /// The match, referenced by id only.
    Result {
        /// Local id of the target entry.
        entry_id: i64,
    },
}

impl SearchResult {
    /// Whether the automatic pass is done with this entry.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Searching)
    }

    /// The target id when there is a match.
    #[must_use]
    pub const fn target_id(&self) -> Option<i64> {
        match self {
            Self::Result { entry_id } => Some(*entry_id),
            _ => None,
        }
    }
}

/// Chapter summary shown next to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Default, uniffi::Record)]
pub struct ChapterInfo {
    /// Highest chapter number, `None` without chapters.
    pub latest_chapter: Option<f64>,
    /// Number of chapters.
    pub chapter_count: u32,
}

impl ChapterInfo {
    /// Summarizes a chapter list.
    #[must_use]
    pub fn from_chapters(chapters: &[Chapter]) -> Self {
        let latest_chapter = chapters
            .iter()
            .map(|chapter| chapter.chapter_number)
            .reduce(f64::max);
        Self {
            latest_chapter,
            chapter_count: u32::try_from(chapters.len()).unwrap_or(u32::MAX),
        }
    }
}

/// How many candidate sources a search pass has gone through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, uniffi::Record)]
pub struct SearchProgress {
    /// Sources the pass will try.
    pub total_sources: u32,
    /// Sources tried so far.
    pub sources_tried: u32,
}

/// One library entry being migrated.
///
/// `scope` is a child of the session token: cancelling it stops this entry's search
/// without touching its siblings.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    /// The entry being migrated away from.
    pub source_entry: CatalogEntry,
    /// Display name of the entry's source.
    pub source_name: String,
    /// Chapter summary of the source entry, computed once.
    pub chapter_info: ChapterInfo,
    /// Current search outcome.
    pub search_result: SearchResult,
    /// Progress of the current search pass.
    pub progress: SearchProgress,
    pub(crate) scope: CancellationToken,
}

impl MigrationUnit {
    /// Creates a unit in the [`SearchResult::Searching`] state.
    #[must_use]
    pub fn new(
        source_entry: CatalogEntry,
        source_name: String,
        chapter_info: ChapterInfo,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            source_entry,
            source_name,
            chapter_info,
            search_result: SearchResult::Searching,
            progress: SearchProgress::default(),
            scope: parent.child_token(),
        }
    }

    /// Id of the source entry, which identifies the unit.
    #[must_use]
    pub const fn entry_id(&self) -> i64 {
        self.source_entry.id
    }

    /// Whether the unit's search was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Immutable view for the host.
    #[must_use]
    pub fn to_item(&self) -> MigrationItem {
        MigrationItem {
            source_entry: self.source_entry.clone(),
            source_name: self.source_name.clone(),
            chapter_info: self.chapter_info,
            search_result: self.search_result,
            progress: self.progress,
        }
    }
}

/// A [`MigrationUnit`] as the host sees it.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct MigrationItem {
    /// The entry being migrated away from.
    pub source_entry: CatalogEntry,
    /// Display name of the entry's source.
    pub source_name: String,
    /// Chapter summary of the source entry.
    pub chapter_info: ChapterInfo,
    /// Current search outcome.
    pub search_result: SearchResult,
    /// Progress of the current search pass.
    pub progress: SearchProgress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{chapter, sample_entry};

    #[test]
    fn test_chapter_info_summary() {
        let chapters = vec![chapter(1, 7, 1.0), chapter(2, 7, 12.5), chapter(3, 7, -1.0)];

        let info = ChapterInfo::from_chapters(&chapters);

        assert_eq!(info.chapter_count, 3);
        assert_eq!(info.latest_chapter, Some(12.5));
        assert_eq!(ChapterInfo::from_chapters(&[]).latest_chapter, None);
    }

    #[test]
    fn test_unit_scope_is_child_of_session() {
        let session = CancellationToken::new();
        let first = MigrationUnit::new(
            sample_entry(1, 10, "Homunculus"),
            "MangaDex".to_string(),
            ChapterInfo::default(),
            &session,
        );
        let second = MigrationUnit::new(
            sample_entry(2, 10, "Oyasumi Punpun"),
            "MangaDex".to_string(),
            ChapterInfo::default(),
            &session,
        );

        first.scope.cancel();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        session.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_search_result_helpers() {
        assert!(!SearchResult::Searching.is_terminal());
        assert!(SearchResult::NotFound.is_terminal());
        assert_eq!(SearchResult::Result { entry_id: 9 }.target_id(), Some(9));
        assert_eq!(SearchResult::NotFound.target_id(), None);
    }
}
