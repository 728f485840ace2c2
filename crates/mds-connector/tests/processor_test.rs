//! Processor loop behaviour around handler failures.

mod common;

use std::time::Duration;

use common::{
    RecordingHandler, TickingClock, broker_record, connector, id_value, run_until, seed_inbox,
};
use mds_core::store::InboxMessageStatus;
use mds_test_support::InMemoryMessageStore;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_ages_message_and_stamps_instance() {
    let store = InMemoryMessageStore::new().with_clock(TickingClock::new());
    seed_inbox(&store, &[broker_record("T", 0, 0, "A", "created", &id_value("a"))]).await;
    let seeded = store.inbox_rows()[0].clone();
    let connector = connector(&store);
    let handler = RecordingHandler::new().failing_when(|_| true);
    let supplier = store.supplier();
    let cancel = CancellationToken::new();

    let result = run_until(
        &cancel,
        connector.process_incoming(&cancel, &supplier, &handler),
        || store.inbox_rows()[0].status_by == connector.instance_id(),
    )
    .await;

    assert!(result.is_ok());
    let row = &store.inbox_rows()[0];
    assert_eq!(row.status, InboxMessageStatus::Pending);
    assert!(row.status_ts > seeded.status_ts);
    assert!(store.side_effects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_idle_processor_polls_without_handling() {
    let store = InMemoryMessageStore::new();
    let connector = connector(&store);
    let handler = RecordingHandler::new();
    let supplier = store.supplier();
    let cancel = CancellationToken::new();

    let stop = async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(connector.process_incoming(&cancel, &supplier, &handler), stop);

    assert!(result.is_ok());
    assert!(handler.calls().is_empty());
    let (commits, rollbacks) = store.tx_counts();
    assert!(commits >= 4);
    assert_eq!(rollbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_database_is_retried() {
    let store = InMemoryMessageStore::new();
    seed_inbox(&store, &[broker_record("T", 0, 0, "k", "created", &id_value("u-1"))]).await;
    store.fail_next_begins(2);
    let connector = connector(&store);
    let handler = RecordingHandler::new();
    let supplier = store.supplier();
    let cancel = CancellationToken::new();

    let result = run_until(
        &cancel,
        connector.process_incoming(&cancel, &supplier, &handler),
        || store.processed().len() == 1,
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(handler.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_selection_rolls_back_and_retries() {
    // Arrange
    let store = InMemoryMessageStore::new();
    seed_inbox(&store, &[broker_record("T", 0, 0, "k", "created", &id_value("u-1"))]).await;
    store.fail_next_selects(1);
    let connector = connector(&store);
    let handler = RecordingHandler::new();
    let supplier = store.supplier();
    let cancel = CancellationToken::new();

    // Act
    let result = run_until(
        &cancel,
        connector.process_incoming(&cancel, &supplier, &handler),
        || store.processed().len() == 1,
    )
    .await;

    // Assert
    assert!(result.is_ok());
    assert_eq!(handler.calls().len(), 1);
    let (_, rollbacks) = store.tx_counts();
    assert_eq!(rollbacks, 1);
    assert_eq!(store.held_locks(), 0);
}
