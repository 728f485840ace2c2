//! Topic readiness.

use std::collections::BTreeSet;
use std::time::Duration;

use mds_core::broker::TopicMetadata;
use mds_core::error::ConnectorError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::connector::pause;

/// Waits until every topic in `topics` shows up in the broker metadata.
///
/// Metadata is read every `poll_interval`. Read failures are logged and
/// retried; topics seen once are not asked for again.
///
/// # Errors
///
/// Returns `ConnectorError::Cancelled` if `cancel` fires first.
#[instrument(skip_all, fields(topics = ?topics))]
pub async fn await_topics<M: TopicMetadata>(
    cancel: &CancellationToken,
    metadata: &M,
    topics: &[String],
    poll_interval: Duration,
) -> Result<(), ConnectorError> {
    let started = Instant::now();
    let mut missing: BTreeSet<String> = topics.iter().cloned().collect();
    while !missing.is_empty() {
        if cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        let wanted: Vec<String> = missing.iter().cloned().collect();
        let read = tokio::select! {
            () = cancel.cancelled() => return Err(ConnectorError::Cancelled),
            read = metadata.read_partitions(&wanted) => read,
        };
        match read {
            Ok(partitions) => {
                for partition in partitions {
                    missing.remove(&partition.topic);
                }
            }
            Err(err) => warn!(error = %err, "read topic partitions failed"),
        }
        if !missing.is_empty() {
            pause(cancel, poll_interval).await?;
        }
    }
    info!(
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "topics available"
    );
    Ok(())
}
