mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;

use common::*;
use priority_board_cell::services::planner;
use priority_board_cell::*;

fn coordinator_for(fake: &Arc<FakePersistence>) -> (Arc<InvalidationCoordinator>, Arc<BoardStore>) {
    let store = Arc::new(BoardStore::default());
    let persistence: Arc<dyn BoardPersistence> = fake.clone();
    let coordinator = Arc::new(InvalidationCoordinator::new(
        Arc::clone(&store),
        persistence,
        FilterRange::around(Utc::now(), 7),
    ));
    (coordinator, store)
}

async fn wait_for_reads(coordinator: &InvalidationCoordinator, count: usize) {
    for _ in 0..400 {
        if coordinator.in_flight_reads().await == count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("expected {} in-flight reads", count);
}

#[tokio::test]
async fn test_unregistered_query_cannot_be_tracked() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, _) = coordinator_for(&fake);

    let result = coordinator
        .track_read(QueryKey::new("agenda"), async { Ok(1u32) })
        .await;

    assert_matches!(result, Err(PriorityBoardError::UnregisteredQuery(key)) if key == "agenda");
}

#[tokio::test]
async fn test_register_dependent_rejects_duplicates_and_board_key() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, _) = coordinator_for(&fake);

    assert!(coordinator.register_dependent(QueryKey::new("agenda")).await);
    assert!(!coordinator.register_dependent(QueryKey::new("agenda")).await);
    assert!(!coordinator.register_dependent(QueryKey::board()).await);
    assert_eq!(coordinator.dependents().await, vec![QueryKey::new("agenda")]);

    assert!(coordinator.unregister_dependent(&QueryKey::new("agenda")).await);
    assert!(coordinator.dependents().await.is_empty());
}

#[tokio::test]
async fn test_reconcile_cancels_dependent_reads_and_invalidates_them() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, store) = coordinator_for(&fake);
    let agenda = QueryKey::new("agenda");
    coordinator.register_dependent(agenda.clone()).await;
    let mut invalidations = coordinator.subscribe_invalidations();

    let background = Arc::clone(&coordinator);
    let key = agenda.clone();
    let dependent = tokio::spawn(async move {
        background
            .track_read(key, std::future::pending::<Result<u32, PriorityBoardError>>())
            .await
    });
    wait_for_reads(&coordinator, 1).await;

    let outcome = coordinator.reconcile(ReconcileReason::Manual).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Reconciled { version: 1 });
    assert_eq!(*store.get(), scenario_board());
    assert_matches!(
        dependent.await.unwrap(),
        Err(PriorityBoardError::ReadCancelled(key)) if key == "agenda"
    );
    assert_eq!(invalidations.recv().await.unwrap(), agenda);
    assert_eq!(coordinator.in_flight_reads().await, 0);
}

#[tokio::test]
async fn test_cancel_in_flight_bumps_epoch() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, _) = coordinator_for(&fake);
    let before = coordinator.epoch();

    assert_eq!(coordinator.cancel_in_flight().await, 0);
    assert_eq!(coordinator.epoch(), before + 1);

    // Nothing owed: a failed undo only cancels.
    let settled = coordinator
        .settle_failed_undo(&MoveSet::full_sync(&scenario_board()))
        .await
        .unwrap();
    assert_eq!(settled, ReconcileOutcome::CancelledOnly);
    assert_eq!(coordinator.epoch(), before + 2);
    assert_eq!(fake.fetches_started(), 0);
}

#[tokio::test]
async fn test_unforced_reconcile_waits_for_pending_mutations() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, store) = coordinator_for(&fake);

    let id = coordinator.begin_mutation(&MoveSet::empty()).await;
    let deferred = coordinator
        .reconcile(ReconcileReason::MutationSettled)
        .await
        .unwrap();
    assert_eq!(deferred, ReconcileOutcome::Deferred { pending_mutations: 1 });
    assert!(coordinator.resync_owed().await);
    assert_eq!(fake.fetches_started(), 0);

    let forced = coordinator.reconcile(ReconcileReason::Rollback).await.unwrap();
    assert_matches!(forced, ReconcileOutcome::Reconciled { .. });
    assert_eq!(*store.get(), scenario_board());
    assert!(!coordinator.resync_owed().await);

    let before = coordinator.epoch();
    assert_eq!(coordinator.end_mutation(id).await, 0);
    assert_eq!(coordinator.epoch(), before + 1, "settling invalidates older reads");
    assert_eq!(coordinator.end_mutation(id).await, 0, "settled ids are ignored");
    assert_eq!(coordinator.epoch(), before + 1);
    assert_eq!(coordinator.pending_mutations().await, 0);
}

#[tokio::test]
async fn test_forced_read_replays_unsettled_moves() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, store) = coordinator_for(&fake);

    let to_b = planner::plan(&scenario_board(), &key("P2"), &placeholder("B").unwrap());
    let id = coordinator.begin_mutation(&to_b).await;

    let forced = coordinator.reconcile(ReconcileReason::Hydrate).await.unwrap();

    assert_matches!(forced, ReconcileOutcome::Reconciled { .. });
    assert_eq!(ranks(&store.get(), "A"), ["P1@0", "P3@1"]);
    assert_eq!(ranks(&store.get(), "B"), ["P2@0"]);

    coordinator.end_mutation(id).await;
    coordinator.reconcile(ReconcileReason::Manual).await.unwrap();
    assert_eq!(*store.get(), scenario_board(), "nothing left to replay");
}

#[tokio::test]
async fn test_fetched_board_is_normalised_before_publish() {
    let mut gappy = board(&[("B", "Q1 Q2"), ("A", "P1 P2")]);
    gappy.columns[0].display_order = 1;
    gappy.columns[1].display_order = 0;
    gappy.columns[0].items[0].position = 4;
    gappy.columns[0].items[1].position = 9;
    gappy.columns[1].items[0].position = 3;
    gappy.columns[1].items[1].position = 1;

    let fake = FakePersistence::new(gappy);
    let (coordinator, store) = coordinator_for(&fake);

    coordinator.reconcile(ReconcileReason::Hydrate).await.unwrap();

    let published = store.get();
    assert_eq!(published.columns[0].id, ColumnId::from("A"));
    assert_eq!(ranks(&published, "A"), ["P2@0", "P1@1"]);
    assert_eq!(ranks(&published, "B"), ["Q1@0", "Q2@1"]);
    assert_invariants(&published);
}

#[tokio::test]
async fn test_failed_read_keeps_published_board() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, store) = coordinator_for(&fake);
    coordinator.reconcile(ReconcileReason::Hydrate).await.unwrap();
    let version = store.version();

    fake.set_server_board(board(&[("A", ""), ("B", "P1 P2 P3")]));
    fake.fail_fetches("maintenance");

    let result = coordinator.reconcile(ReconcileReason::Manual).await;

    assert_matches!(result, Err(PriorityBoardError::Rejected { status: 503, .. }));
    assert_eq!(store.version(), version);
    assert_eq!(*store.get(), scenario_board());
}

#[tokio::test]
async fn test_filter_change_is_used_by_next_read() {
    let fake = FakePersistence::new(scenario_board());
    let (coordinator, _) = coordinator_for(&fake);
    let narrow = FilterRange::around(Utc::now(), 1);

    coordinator.set_filter(narrow.clone()).await;

    assert_eq!(coordinator.filter().await, narrow);
}
