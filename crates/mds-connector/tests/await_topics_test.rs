//! Topic readiness against a stub broker.

use std::time::Duration;

use mds_connector::await_topics;
use mds_test_support::StubTopicMetadata;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_returns_within_poll_interval_after_last_topic_appears() {
    let metadata = StubTopicMetadata::new();
    let topics = vec!["X".to_string(), "Y".to_string()];
    let poll_interval = Duration::from_secs(1);
    let cancel = CancellationToken::new();

    let waiting = async {
        let result = await_topics(&cancel, &metadata, &topics, poll_interval).await;
        (result, Instant::now())
    };
    let creating = async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        metadata.create_topic("X", 3);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        metadata.create_topic("Y", 1);
        Instant::now()
    };
    let ((result, returned_at), last_created_at) = tokio::join!(waiting, creating);

    assert!(result.is_ok());
    assert!(returned_at >= last_created_at);
    assert!(returned_at - last_created_at <= poll_interval);
}
