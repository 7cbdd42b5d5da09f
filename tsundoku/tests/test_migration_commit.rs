mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{ControllerSlot, Fixture};
use futures::FutureExt;
use tsundoku::migration::flags;
use tsundoku::migration::{MigrationController, MigrationError, MigrationEvent, SearchResult};
use tsundoku::test_utils::{candidate, sample_entry, FakeCatalogSource, RecordingObserver};

const TITLES: [&str; 5] = ["Akira", "Pluto", "Monster", "Vagabond", "Berserk"];

/// A catalog that has every title of [`TITLES`] under `/match/<title>`.
fn catalog() -> Arc<FakeCatalogSource> {
    let source = TITLES.iter().fold(FakeCatalogSource::new(21, "Catalog"), |source, title| {
        let url = format!("/match/{title}");
        source
            .with_results(title, vec![candidate(&url, title)])
            .with_chapters(&url, 3)
    });
    Arc::new(source)
}

async fn started_session(fixture: &Fixture, count: usize) -> Arc<MigrationController> {
    let entry_ids = (1_i64..).take(count).collect();
    let controller = fixture.controller(entry_ids, vec![catalog()]);
    controller.start().await.unwrap();
    controller
}

fn five_entries() -> Fixture {
    Fixture::new().with_entries(&TITLES).with_candidates(vec![21])
}

#[tokio::test]
async fn test_migrate_all_commits_every_match_and_navigates_out() {
    let fixture = five_entries();
    fixture.preferences.set_migrate_flags(flags::CHAPTERS).unwrap();
    let controller = started_session(&fixture, 5).await;
    let observer = Arc::new(RecordingObserver::new());
    controller.set_observer(observer.clone());

    controller.migrate_all().await.unwrap();

    for id in 1..=5 {
        assert!(!fixture.library.entry(id).unwrap().favorite);
    }
    let akira = fixture.library.entry_by_url(21, "/match/Akira").unwrap();
    assert!(akira.favorite);

    let events = observer.events();
    assert_eq!(events.last(), Some(&MigrationEvent::NavigateOut));
    let progress: Vec<f64> = events
        .iter()
        .filter_map(|event| match event {
            MigrationEvent::CommitProgress { progress } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0.2, 0.4, 0.6, 0.8, 1.0]);

    let snapshot = controller.snapshot();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.commit_progress, None);
    assert!(observer.snapshot_count() > 5);
    assert_eq!(observer.last_snapshot(), Some(snapshot));
}

#[tokio::test]
async fn test_copy_all_keeps_source_entries() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 2).await;

    controller.copy_all().await.unwrap();

    assert!(fixture.library.entry(1).unwrap().favorite);
    assert!(fixture.library.entry(2).unwrap().favorite);
    assert!(fixture.library.entry_by_url(21, "/match/Pluto").unwrap().favorite);
}

#[tokio::test]
async fn test_second_bulk_commit_is_rejected_while_one_runs() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 3).await;
    let slot = ControllerSlot::new();
    slot.fill(&controller);
    let rejected = Arc::new(AtomicBool::new(false));

    let hook_slot = slot.clone();
    let hook_rejected = rejected.clone();
    controller.set_observer(Arc::new(RecordingObserver::with_hook(move |event| {
        if !matches!(event, MigrationEvent::CommitProgress { .. }) {
            return;
        }
        let Some(controller) = hook_slot.get() else {
            return;
        };
        let second = controller.copy_all().now_or_never();
        if matches!(second, Some(Err(MigrationError::InvalidOperation(_)))) {
            hook_rejected.store(true, Ordering::SeqCst);
        }
    })));

    controller.migrate_all().await.unwrap();

    assert!(rejected.load(Ordering::SeqCst));
    assert!(controller.snapshot().items.is_empty());
}

#[tokio::test]
async fn test_cancel_commit_stops_between_entries() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 5).await;
    let slot = ControllerSlot::new();
    slot.fill(&controller);

    let hook_slot = slot.clone();
    controller.set_observer(Arc::new(RecordingObserver::with_hook(move |event| {
        if let MigrationEvent::CommitProgress { progress } = event {
            if *progress >= 0.4 {
                if let Some(controller) = hook_slot.get() {
                    controller.cancel_commit();
                }
            }
        }
    })));

    let result = controller.migrate_all().await;

    assert!(matches!(result, Err(MigrationError::Cancelled)));
    let snapshot = controller.snapshot();
    let remaining: Vec<i64> = snapshot.items.iter().map(|item| item.source_entry.id).collect();
    assert_eq!(remaining, vec![3, 4, 5]);
    assert_eq!(snapshot.commit_progress, None);
    assert!(!fixture.library.entry(1).unwrap().favorite);
    assert!(!fixture.library.entry(2).unwrap().favorite);
    assert!(fixture.library.entry(3).unwrap().favorite);
    assert!(!controller.cancel_commit());
}

#[tokio::test]
async fn test_failing_entry_does_not_abort_the_bulk_commit() {
    let fixture = five_entries();
    fixture.library.fail_entry_updates_for(2);
    let controller = started_session(&fixture, 3).await;
    let mut events = controller.events();

    controller.migrate_all().await.unwrap();

    let remaining: Vec<i64> = controller
        .snapshot()
        .items
        .iter()
        .map(|item| item.source_entry.id)
        .collect();
    assert_eq!(remaining, vec![2]);
    assert!(!fixture.library.entry(1).unwrap().favorite);
    assert!(fixture.library.entry(2).unwrap().favorite);
    assert!(!fixture.library.entry(3).unwrap().favorite);

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    assert_eq!(last, Some(MigrationEvent::NavigateOut));
}

#[tokio::test]
async fn test_migrate_now_and_copy_now() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 3).await;

    controller.migrate_now(1).await.unwrap();
    controller.copy_now(2).await.unwrap();

    assert!(!fixture.library.entry(1).unwrap().favorite);
    assert!(fixture.library.entry(2).unwrap().favorite);
    assert!(fixture.library.entry_by_url(21, "/match/Pluto").unwrap().favorite);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.manual_migrations, 2);
    assert_eq!(snapshot.remaining_entry_ids, vec![3]);
    assert!(matches!(
        controller.migrate_now(1).await,
        Err(MigrationError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_commit_without_match_is_rejected() {
    let fixture = Fixture::new()
        .with_entries(&["Unknown title"])
        .with_candidates(vec![21]);
    let controller = fixture.controller(vec![1], vec![catalog()]);
    controller.start().await.unwrap();
    assert_eq!(controller.snapshot().items[0].search_result, SearchResult::NotFound);

    assert!(matches!(
        controller.copy_now(1).await,
        Err(MigrationError::InvalidOperation(_))
    ));
    let dialog = controller.migrate_dialog(true);
    assert_eq!((dialog.total, dialog.skipped), (1, 1));
}

#[tokio::test]
async fn test_manual_match_failure_reports_the_unit() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 1).await;
    let mut events = controller.events();

    controller.use_entry_for_migration(999, 1).await.unwrap();

    assert_eq!(controller.snapshot().items[0].search_result, SearchResult::NotFound);
    assert_eq!(
        events.try_recv().unwrap(),
        MigrationEvent::ManualSearchFailed { entry_id: 1 }
    );
}

#[tokio::test]
async fn test_manual_match_uses_the_picked_entry() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 1).await;
    let picked = fixture.library.insert_entry(sample_entry(50, 21, "Akira (Remaster)"));

    controller.use_entry_for_migration(picked.id, 1).await.unwrap();

    assert_eq!(
        controller.snapshot().items[0].search_result,
        SearchResult::Result {
            entry_id: picked.id,
        }
    );
    assert!(matches!(
        controller.use_entry_for_migration(picked.id, 42).await,
        Err(MigrationError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_concurrent_removal_happens_once() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 3).await;

    let removed = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| controller.remove_entry(2)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|removed| *removed)
            .count()
    });

    assert_eq!(removed, 1);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.remaining_entry_ids, vec![1, 3]);
    assert_eq!(snapshot.items.len(), 2);
}

#[tokio::test]
async fn test_removing_the_last_entry_navigates_out() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 1).await;
    let mut events = controller.events();

    assert!(controller.remove_entry(1));

    assert_eq!(events.try_recv().unwrap(), MigrationEvent::NavigateOut);
    assert!(!controller.remove_entry(1));
}

#[tokio::test]
async fn test_manual_match_after_cancelled_search() {
    let fixture = Fixture::new().with_entries(&["Slow"]).with_candidates(vec![21]);
    let picked = fixture.library.insert_entry(sample_entry(50, 21, "Slow (Remaster)"));
    let source = Arc::new(
        FakeCatalogSource::new(21, "Catalog").with_delay(Duration::from_millis(50)),
    );
    let controller = fixture.controller(vec![1], vec![source]);
    let runner = controller.clone();
    let search = tokio::spawn(async move { runner.start().await });

    let mut state = controller.subscribe();
    state.wait_for(|state| state.units.is_some()).await.unwrap();
    assert!(controller.cancel_unit_search(1));
    search.await.unwrap().unwrap();
    assert_eq!(
        controller.snapshot().items[0].search_result,
        SearchResult::Searching
    );

    controller.use_entry_for_migration(picked.id, 1).await.unwrap();

    let snapshot = controller.snapshot();
    assert_eq!(
        snapshot.items[0].search_result,
        SearchResult::Result {
            entry_id: picked.id,
        }
    );
    assert!(snapshot.migration_done);
}

#[tokio::test]
async fn test_manual_match_failure_after_cancelled_search() {
    let fixture = Fixture::new().with_entries(&["Slow"]).with_candidates(vec![21]);
    let source = Arc::new(
        FakeCatalogSource::new(21, "Catalog").with_delay(Duration::from_millis(50)),
    );
    let controller = fixture.controller(vec![1], vec![source]);
    let runner = controller.clone();
    let search = tokio::spawn(async move { runner.start().await });

    let mut state = controller.subscribe();
    state.wait_for(|state| state.units.is_some()).await.unwrap();
    assert!(controller.cancel_unit_search(1));
    search.await.unwrap().unwrap();
    let mut events = controller.events();

    controller.use_entry_for_migration(999, 1).await.unwrap();

    assert_eq!(
        controller.snapshot().items[0].search_result,
        SearchResult::NotFound
    );
    assert_eq!(
        events.try_recv().unwrap(),
        MigrationEvent::ManualSearchFailed { entry_id: 1 }
    );
}

#[tokio::test]
async fn test_manual_match_on_disposed_session_keeps_the_result() {
    let fixture = five_entries();
    let controller = started_session(&fixture, 1).await;
    let before = controller.snapshot().items[0].search_result;
    let picked = fixture.library.insert_entry(sample_entry(50, 21, "Akira (Remaster)"));

    controller.dispose();

    assert!(matches!(
        controller.use_entry_for_migration(picked.id, 1).await,
        Err(MigrationError::Cancelled)
    ));
    assert_eq!(controller.snapshot().items[0].search_result, before);
    assert!(matches!(before, SearchResult::Result { .. }));
}
