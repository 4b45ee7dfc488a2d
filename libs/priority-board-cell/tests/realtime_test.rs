mod common;

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, timeout, Duration};

use common::*;
use priority_board_cell::*;

fn updated(entity: &str) -> RealtimeEvent {
    RealtimeEvent::EntityUpdated {
        entity_id: entity.to_string(),
    }
}

#[tokio::test]
async fn test_publish_without_listeners_reaches_nobody() {
    let realtime = RealtimeEventService::default();

    assert_eq!(realtime.listener_count(), 0);
    assert_eq!(realtime.publish(&updated("P1")).unwrap(), 0);
}

#[tokio::test]
async fn test_realtime_event_reconciles_board() {
    let (engine, fake) = hydrated(scenario_board()).await;
    let _listener = engine.start_realtime();
    assert_eq!(engine.realtime().listener_count(), 1);

    fake.set_server_board(board(&[("A", "P3 P1"), ("B", "P2")]));
    let delivered = engine
        .realtime()
        .publish(&RealtimeEvent::ExternalConfirmationResolved {
            entity_id: "P2".to_string(),
        })
        .unwrap();
    assert_eq!(delivered, 1);

    assert!(eventually(|| ranks(&engine.board(), "B") == ["P2@0"]).await);
    assert_eq!(ranks(&engine.board(), "A"), ["P3@0", "P1@1"]);
}

#[tokio::test]
async fn test_malformed_message_is_skipped() {
    let (engine, fake) = hydrated(scenario_board()).await;
    let _listener = engine.start_realtime();

    engine.realtime().publish_raw("{not json".to_string());
    engine.realtime().publish(&updated("P1")).unwrap();

    assert!(eventually(|| fake.fetches_completed() == 2).await);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(fake.fetches_started(), 2, "one hydrate, one realtime reconcile");
}

#[tokio::test]
async fn test_listener_stops_when_channel_closes() {
    let fake = FakePersistence::new(scenario_board());
    let store = Arc::new(BoardStore::default());
    let persistence: Arc<dyn BoardPersistence> = fake.clone();
    let coordinator = Arc::new(InvalidationCoordinator::new(
        store,
        persistence,
        FilterRange::around(Utc::now(), 7),
    ));
    let realtime = RealtimeEventService::new(8);

    let listener = spawn_realtime_listener(coordinator, realtime.subscribe());
    drop(realtime);

    timeout(Duration::from_secs(2), listener)
        .await
        .expect("listener should stop")
        .unwrap();
    assert_eq!(fake.fetches_started(), 0);
}
