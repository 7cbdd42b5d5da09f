//! Moves user state from one entry to another.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use crate::catalog::{
    CatalogEntry, CategoryStore, ChapterStore, ChapterUpdate, CoverCache, EntryStore,
    EntryUpdate, HistoryStore, HistoryUpdate, TrackLink, TrackStore,
};
use crate::migration::flags;

/// The persistence collaborators a session reads and writes.
#[derive(Clone)]
pub struct Library {
    /// Library entries.
    pub entries: Arc<dyn EntryStore>,
    /// Chapters.
    pub chapters: Arc<dyn ChapterStore>,
    /// Reading history.
    pub history: Arc<dyn HistoryStore>,
    /// Category membership.
    pub categories: Arc<dyn CategoryStore>,
    /// Tracking links.
    pub tracks: Arc<dyn TrackStore>,
    /// Custom covers.
    pub cover_cache: Arc<dyn CoverCache>,
}

/// Transfers the state selected by `flags` from `source` to `target`.
///
/// The target always ends up in the library with `date_added = now`. With `replace` the
/// source leaves the library and the target takes over its `date_added`. Entry rows are
/// written in one batch at the end. Transferring an entry onto itself does nothing.
///
/// # Errors
/// The first failing store call, with the step it belongs to as context.
pub async fn transfer_entry(
    library: &Library,
    source: &CatalogEntry,
    target: &CatalogEntry,
    flags: i32,
    replace: bool,
) -> anyhow::Result<()> {
    if source.id == target.id {
        return Ok(());
    }

    if flags::has_chapters(flags) {
        transfer_chapters(library, source.id, target.id)
            .await
            .context("transfer chapters")?;
    }

    if flags::has_categories(flags) {
        let categories = library
            .categories
            .list_for_entry(source.id)
            .await
            .context("load categories")?;
        library
            .categories
            .set_for_entry(target.id, categories.iter().map(|category| category.id).collect())
            .await
            .context("set categories")?;
    }

    if flags::has_tracks(flags) {
        transfer_tracks(library, source.id, target.id)
            .await
            .context("transfer tracking")?;
    }

    if flags::has_custom_cover(flags)
        && library.cover_cache.has_custom_cover(source.clone()).await
    {
        let cover = library
            .cover_cache
            .read_custom_cover(source.id)
            .await
            .context("read custom cover")?;
        library
            .cover_cache
            .write_custom_cover(target.clone(), cover)
            .await
            .context("write custom cover")?;
    }

    let updates = entry_updates(source, target, flags, replace, Utc::now().timestamp_millis());
    library
        .entries
        .update_batch(updates)
        .await
        .context("update entries")?;

    Ok(())
}

/// The entry rows a transfer writes.
fn entry_updates(
    source: &CatalogEntry,
    target: &CatalogEntry,
    flags: i32,
    replace: bool,
    now_millis: i64,
) -> Vec<EntryUpdate> {
    let mut target_update = EntryUpdate {
        favorite: Some(true),
        date_added: Some(now_millis),
        ..EntryUpdate::new(target.id)
    };

    if flags::has_extra(flags) {
        target_update.chapter_flags = Some(source.chapter_flags);
        target_update.viewer_flags = Some(source.viewer_flags);
    }

    if !replace {
        return vec![target_update];
    }

    target_update.date_added = Some(source.date_added);
    let source_update = EntryUpdate {
        favorite: Some(false),
        date_added: Some(0),
        ..EntryUpdate::new(source.id)
    };
    vec![target_update, source_update]
}

#[allow(clippy::float_cmp)]
async fn transfer_chapters(
    library: &Library,
    source_id: i64,
    target_id: i64,
) -> anyhow::Result<()> {
    let source_chapters = library.chapters.list_by_entry_id(source_id).await?;
    let target_chapters = library.chapters.list_by_entry_id(target_id).await?;
    let source_history = library.history.list_by_entry_id(source_id).await?;

    let max_chapter_read = source_chapters
        .iter()
        .filter(|chapter| chapter.read)
        .map(|chapter| chapter.chapter_number)
        .reduce(f64::max);

    let mut chapter_updates = Vec::new();
    let mut history_updates = Vec::new();

    for chapter in target_chapters.iter().filter(|c| c.is_recognized_number()) {
        let counterpart = source_chapters.iter().find(|previous| {
            previous.is_recognized_number() && previous.chapter_number == chapter.chapter_number
        });

        if let Some(previous) = counterpart {
            chapter_updates.push(ChapterUpdate {
                id: chapter.id,
                read: Some(previous.read),
                bookmark: Some(previous.bookmark),
                date_fetch: Some(previous.date_fetch),
            });

            let history = source_history
                .iter()
                .find(|history| history.chapter_id == previous.id);
            if let Some((read_at, read_duration)) =
                history.and_then(|history| Some((history.read_at?, history.read_duration)))
            {
                history_updates.push(HistoryUpdate {
                    chapter_id: chapter.id,
                    read_at,
                    session_read_duration: read_duration,
                });
            }
        } else if max_chapter_read.is_some_and(|max| chapter.chapter_number <= max) {
            chapter_updates.push(ChapterUpdate {
                id: chapter.id,
                read: Some(true),
                ..ChapterUpdate::default()
            });
        }
    }

    if !chapter_updates.is_empty() {
        library.chapters.update_batch(chapter_updates).await?;
    }
    if !history_updates.is_empty() {
        library.history.upsert_batch(history_updates).await?;
    }
    Ok(())
}

async fn transfer_tracks(library: &Library, source_id: i64, target_id: i64) -> anyhow::Result<()> {
    let links = library.tracks.list_for_entry(source_id).await?;
    if links.is_empty() {
        return Ok(());
    }

    let services: BTreeSet<i64> = links.iter().map(|link| link.service_id).collect();
    for service_id in services {
        library.tracks.delete_for_service(target_id, service_id).await?;
    }

    let repointed: Vec<TrackLink> = links
        .into_iter()
        .map(|link| TrackLink {
            entry_id: target_id,
            ..link
        })
        .collect();
    library.tracks.insert_batch(repointed).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, HistoryRecord};
    use crate::test_utils::{
        chapter, sample_entry, sample_track, InMemoryCoverCache, InMemoryLibrary,
    };

    fn library(store: &Arc<InMemoryLibrary>, covers: &Arc<InMemoryCoverCache>) -> Library {
        Library {
            entries: store.clone(),
            chapters: store.clone(),
            history: store.clone(),
            categories: store.clone(),
            tracks: store.clone(),
            cover_cache: covers.clone(),
        }
    }

    #[test]
    fn test_copy_keeps_source_untouched() {
        let mut source = sample_entry(1, 10, "Akira");
        source.date_added = 1_000;
        let target = sample_entry(2, 20, "Akira");

        let updates = entry_updates(&source, &target, flags::CHAPTERS, false, 5_000);

        assert_eq!(
            updates,
            vec![EntryUpdate {
                favorite: Some(true),
                date_added: Some(5_000),
                ..EntryUpdate::new(2)
            }]
        );
    }

    #[test]
    fn test_replace_moves_date_added_and_unfavorites_source() {
        let mut source = sample_entry(1, 10, "Akira");
        source.date_added = 1_000;
        source.chapter_flags = 7;
        source.viewer_flags = 3;
        let target = sample_entry(2, 20, "Akira");

        let updates = entry_updates(&source, &target, flags::EXTRA, true, 5_000);

        assert_eq!(
            updates,
            vec![
                EntryUpdate {
                    id: 2,
                    favorite: Some(true),
                    date_added: Some(1_000),
                    chapter_flags: Some(7),
                    viewer_flags: Some(3),
                },
                EntryUpdate {
                    favorite: Some(false),
                    date_added: Some(0),
                    ..EntryUpdate::new(1)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_chapters_copy_by_number_and_threshold() {
        let store = InMemoryLibrary::new();
        let covers = Arc::new(InMemoryCoverCache::new());
        let source = store.insert_entry(sample_entry(1, 10, "Pluto"));
        let target = store.insert_entry(sample_entry(2, 20, "Pluto"));

        for (id, number) in [(11, 1.0), (12, 2.0), (13, 3.0)] {
            let mut read = chapter(id, source.id, number);
            read.read = true;
            read.bookmark = number == 2.0;
            read.date_fetch = 100 + id;
            store.insert_chapter(read);
        }
        store.insert_history(HistoryRecord {
            chapter_id: 12,
            read_at: Some(777),
            read_duration: 60,
        });
        store.insert_history(HistoryRecord {
            chapter_id: 13,
            read_at: None,
            read_duration: 5,
        });

        store.insert_chapter(chapter(21, target.id, 1.0));
        store.insert_chapter(chapter(22, target.id, 2.0));
        store.insert_chapter(chapter(23, target.id, 2.5));
        store.insert_chapter(chapter(24, target.id, 4.0));
        store.insert_chapter(chapter(25, target.id, -1.0));
        store.insert_chapter(chapter(26, target.id, 3.0));

        transfer_entry(&library(&store, &covers), &source, &target, flags::CHAPTERS, false)
            .await
            .unwrap();

        let by_id = |id: i64| store.chapter(id).unwrap();
        assert!(by_id(21).read);
        assert!(by_id(22).read && by_id(22).bookmark);
        assert_eq!(by_id(22).date_fetch, 112);
        // no exact counterpart, below the highest read chapter
        assert!(by_id(23).read && !by_id(23).bookmark);
        assert!(!by_id(24).read);
        assert!(!by_id(25).read);

        let history = store.history_for_chapter(22).unwrap();
        assert_eq!(history.read_at, Some(777));
        assert_eq!(history.read_duration, 60);
        // source history without a timestamp is not copied
        assert!(store.chapter(26).unwrap().read);
        assert!(store.history_for_chapter(26).is_none());
    }

    #[tokio::test]
    async fn test_exact_counterpart_wins_over_threshold() {
        let store = InMemoryLibrary::new();
        let covers = Arc::new(InMemoryCoverCache::new());
        let source = store.insert_entry(sample_entry(1, 10, "Pluto"));
        let target = store.insert_entry(sample_entry(2, 20, "Pluto"));
        for (id, number, read) in [(11, 1.0, true), (12, 3.0, false), (13, 4.0, true)] {
            let mut previous = chapter(id, source.id, number);
            previous.read = read;
            store.insert_chapter(previous);
        }
        for (id, number) in [(21, 1.0), (22, 2.0), (23, 3.0), (24, 4.0), (25, 5.0)] {
            store.insert_chapter(chapter(id, target.id, number));
        }

        transfer_entry(&library(&store, &covers), &source, &target, flags::CHAPTERS, false)
            .await
            .unwrap();

        assert!(store.chapter(21).unwrap().read);
        // missing on the source, below the highest read chapter 4
        assert!(store.chapter(22).unwrap().read);
        // unread on the source, copied as is
        assert!(!store.chapter(23).unwrap().read);
        assert!(store.chapter(24).unwrap().read);
        assert!(!store.chapter(25).unwrap().read);
    }

    #[tokio::test]
    async fn test_categories_tracks_and_cover() {
        let store = InMemoryLibrary::new();
        let covers = Arc::new(InMemoryCoverCache::new());
        let source = store.insert_entry(sample_entry(1, 10, "Vagabond"));
        let target = store.insert_entry(sample_entry(2, 20, "Vagabond"));

        store.set_categories(
            source.id,
            vec![
                Category {
                    id: 4,
                    name: "Reading".to_string(),
                    order: 0,
                },
                Category {
                    id: 9,
                    name: "Seinen".to_string(),
                    order: 1,
                },
            ],
        );
        store.set_categories(
            target.id,
            vec![Category {
                id: 1,
                name: "Default".to_string(),
                order: 0,
            }],
        );
        store.insert_track(sample_track(source.id, 2));
        store.insert_track(sample_track(target.id, 2));
        store.insert_track(sample_track(target.id, 5));
        covers.put(source.id, vec![0xff, 0xd8]);

        let all = flags::CHAPTERS | flags::CATEGORIES | flags::TRACK | flags::CUSTOM_COVER;
        transfer_entry(&library(&store, &covers), &source, &target, all, true)
            .await
            .unwrap();

        assert_eq!(store.category_ids(target.id), vec![4, 9]);

        let mut services: Vec<(i64, i64)> = store
            .tracks_for(target.id)
            .iter()
            .map(|link| (link.service_id, link.entry_id))
            .collect();
        services.sort_unstable();
        assert_eq!(services, vec![(2, 2), (5, 2)]);
        assert_eq!(store.tracks_for(source.id).len(), 1);

        assert_eq!(covers.get(target.id), Some(vec![0xff, 0xd8]));

        let source_after = store.entry(source.id).unwrap();
        assert!(!source_after.favorite);
        assert_eq!(source_after.date_added, 0);
        assert!(store.entry(target.id).unwrap().favorite);
    }

    #[tokio::test]
    async fn test_flags_gate_every_step() {
        let store = InMemoryLibrary::new();
        let covers = Arc::new(InMemoryCoverCache::new());
        let source = store.insert_entry(sample_entry(1, 10, "Vagabond"));
        let target = store.insert_entry(sample_entry(2, 20, "Vagabond"));
        store.set_categories(
            source.id,
            vec![Category {
                id: 4,
                name: "Reading".to_string(),
                order: 0,
            }],
        );
        store.insert_track(sample_track(source.id, 2));
        covers.put(source.id, vec![1]);

        transfer_entry(&library(&store, &covers), &source, &target, 0, false)
            .await
            .unwrap();

        assert!(store.category_ids(target.id).is_empty());
        assert!(store.tracks_for(target.id).is_empty());
        assert_eq!(covers.get(target.id), None);
        assert!(store.entry(target.id).unwrap().favorite);
    }

    #[tokio::test]
    async fn test_same_entry_is_a_no_op() {
        let store = InMemoryLibrary::new();
        let covers = Arc::new(InMemoryCoverCache::new());
        let entry = store.insert_entry(sample_entry(1, 10, "Vagabond"));

        transfer_entry(&library(&store, &covers), &entry, &entry, i32::MAX, true)
            .await
            .unwrap();

        assert_eq!(store.entry_update_batches(), 0);
        assert_eq!(store.entry(entry.id), Some(entry));
    }

    #[tokio::test]
    async fn test_store_failure_carries_step_context() {
        let store = InMemoryLibrary::new();
        let covers = Arc::new(InMemoryCoverCache::new());
        let source = store.insert_entry(sample_entry(1, 10, "Vagabond"));
        let target = store.insert_entry(sample_entry(2, 20, "Vagabond"));
        store.fail_entry_updates_for(target.id);

        let err = transfer_entry(&library(&store, &covers), &source, &target, 0, false)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "update entries");
    }
}
