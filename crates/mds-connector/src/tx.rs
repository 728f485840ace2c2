//! Finishing connector transactions.

use std::time::Duration;

use mds_core::error::ConnectorError;
use mds_core::tx::Transaction;
use tracing::warn;

/// Commits `tx` if `result` is `Ok` and rolls it back otherwise.
///
/// The commit is bounded by `commit_timeout` but not by cancellation, so a
/// shutdown never abandons a commit that is already in flight. A failed
/// rollback is only logged; the original error is returned.
///
/// # Errors
///
/// Returns the error carried by `result`, the commit error, or
/// `ConnectorError::Timeout` if the commit did not finish in time.
pub async fn finish_tx<Tx, T>(
    tx: Tx,
    result: Result<T, ConnectorError>,
    commit_timeout: Duration,
) -> Result<T, ConnectorError>
where
    Tx: Transaction,
{
    match result {
        Ok(value) => match tokio::time::timeout(commit_timeout, tx.commit()).await {
            Ok(committed) => committed.map(|()| value),
            Err(_) => Err(ConnectorError::Timeout {
                operation: "commit tx",
                after: commit_timeout,
            }),
        },
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback tx failed");
            }
            Err(err)
        }
    }
}
