//! Bitmask selecting which state a commit transfers.
//!
//! Bit positions are persisted in preferences and must never be renumbered.

use std::sync::Arc;

use crate::catalog::{CatalogEntry, CoverCache, TrackStore};

/// Read progress, bookmarks and history.
pub const CHAPTERS: i32 = 0b0001;
/// Category membership.
pub const CATEGORIES: i32 = 0b0010;
/// Tracking service links.
pub const TRACK: i32 = 0b0100;
/// User-chosen cover.
pub const CUSTOM_COVER: i32 = 0b1000;
/// Chapter list and reader display settings.
pub const EXTRA: i32 = 0b1_0000;

/// The flags a selector shows, in display order. [`EXTRA`] is not part of it.
pub const ORDERED_FLAGS: [i32; 4] = [CHAPTERS, CATEGORIES, TRACK, CUSTOM_COVER];

/// One row of the transfer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum MigrationOption {
    /// See [`CHAPTERS`].
    Chapters,
    /// See [`CATEGORIES`].
    Categories,
    /// See [`TRACK`].
    Track,
    /// See [`CUSTOM_COVER`].
    CustomCover,
}

/// Whether the [`CHAPTERS`] bit is set.
#[uniffi::export]
#[must_use]
pub fn has_chapters(value: i32) -> bool {
    value & CHAPTERS != 0
}

/// Whether the [`CATEGORIES`] bit is set.
#[uniffi::export]
#[must_use]
pub fn has_categories(value: i32) -> bool {
    value & CATEGORIES != 0
}

/// Whether the [`TRACK`] bit is set.
#[uniffi::export]
#[must_use]
pub fn has_tracks(value: i32) -> bool {
    value & TRACK != 0
}

/// Whether the [`CUSTOM_COVER`] bit is set.
#[uniffi::export]
#[must_use]
pub fn has_custom_cover(value: i32) -> bool {
    value & CUSTOM_COVER != 0
}

/// Whether the [`EXTRA`] bit is set.
#[uniffi::export]
#[must_use]
pub fn has_extra(value: i32) -> bool {
    value & EXTRA != 0
}

/// Indices into [`ORDERED_FLAGS`] whose bit is set in `value`.
#[uniffi::export]
#[must_use]
pub fn enabled_positions(value: i32) -> Vec<i32> {
    (0_i32..)
        .zip(ORDERED_FLAGS)
        .filter(|(_, flag)| value & flag != 0)
        .map(|(position, _)| position)
        .collect()
}

/// ORs `1 << position` for every position. Positions outside `0..32` contribute nothing.
#[uniffi::export]
#[must_use]
pub fn positions_to_flags(positions: Vec<i32>) -> i32 {
    positions.into_iter().fold(0, |accumulated, position| {
        let bit = u32::try_from(position)
            .ok()
            .and_then(|shift| 1_i32.checked_shl(shift))
            .unwrap_or(0);
        accumulated | bit
    })
}

/// Selector rows that make sense for `entry`.
///
/// Chapters and categories are always offered, tracking only when the entry has links and
/// the cover only when the user set a custom one. A failing track lookup hides the row.
#[uniffi::export(async_runtime = "tokio")]
pub async fn available_options(
    entry: CatalogEntry,
    tracks: Arc<dyn TrackStore>,
    cover_cache: Arc<dyn CoverCache>,
) -> Vec<MigrationOption> {
    let mut options = vec![MigrationOption::Chapters, MigrationOption::Categories];

    match tracks.list_for_entry(entry.id).await {
        Ok(links) if !links.is_empty() => options.push(MigrationOption::Track),
        Ok(_) => {}
        Err(e) => crate::debug!(
            "migration_flags.track_lookup_failed entry_id={} error={e}",
            entry.id
        ),
    }

    if cover_cache.has_custom_cover(entry).await {
        options.push(MigrationOption::CustomCover);
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_entry, sample_track, InMemoryCoverCache, InMemoryLibrary};

    #[test]
    fn test_bit_tests() {
        let value = CHAPTERS | TRACK | EXTRA;

        assert!(has_chapters(value));
        assert!(!has_categories(value));
        assert!(has_tracks(value));
        assert!(!has_custom_cover(value));
        assert!(has_extra(value));
        assert!(has_extra(i32::MAX));
        assert!(!has_chapters(0));
    }

    #[test]
    fn test_enabled_positions() {
        assert_eq!(enabled_positions(CATEGORIES | CUSTOM_COVER), vec![1, 3]);
        assert_eq!(enabled_positions(i32::MAX), vec![0, 1, 2, 3]);
        assert!(enabled_positions(EXTRA).is_empty());
        assert_eq!(enabled_positions(-1), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_positions_round_trip_drops_extra() {
        for value in [0, CHAPTERS, CATEGORIES | TRACK, i32::MAX, EXTRA | CUSTOM_COVER, -7] {
            let restricted = value & (CHAPTERS | CATEGORIES | TRACK | CUSTOM_COVER);
            assert_eq!(positions_to_flags(enabled_positions(value)), restricted);
        }
    }

    #[test]
    fn test_positions_out_of_range_are_ignored() {
        assert_eq!(positions_to_flags(vec![-1, 32, 40]), 0);
        assert_eq!(positions_to_flags(vec![4]), EXTRA);
        assert_eq!(positions_to_flags(vec![0, 0, 2]), CHAPTERS | TRACK);
    }

    #[tokio::test]
    async fn test_available_options_depend_on_entry() {
        let library = InMemoryLibrary::new();
        let cover_cache = Arc::new(InMemoryCoverCache::new());
        let plain = library.insert_entry(sample_entry(1, 10, "Blame!"));
        let tracked = library.insert_entry(sample_entry(2, 10, "Biomega"));
        library.insert_track(sample_track(tracked.id, 3));
        cover_cache.put(tracked.id, vec![1, 2, 3]);

        let options = available_options(plain, library.clone(), cover_cache.clone()).await;
        assert_eq!(
            options,
            vec![MigrationOption::Chapters, MigrationOption::Categories]
        );

        let options = available_options(tracked, library, cover_cache).await;
        assert_eq!(
            options,
            vec![
                MigrationOption::Chapters,
                MigrationOption::Categories,
                MigrationOption::Track,
                MigrationOption::CustomCover,
            ]
        );
    }
}
