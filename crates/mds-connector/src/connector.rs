//! The connector: owns the message store and runs the inbox and outbox loops.

use std::time::Duration;

use async_trait::async_trait;
use mds_core::broker::{BrokerReader, BrokerWriter};
use mds_core::error::ConnectorError;
use mds_core::handler::{InboxHandler, OutboxWriter};
use mds_core::instance::InstanceId;
use mds_core::message::OutboundMessage;
use mds_core::store::MessageStore;
use mds_core::tx::TxSupplier;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::ConnectorConfig;

/// Moves messages between the event broker and the service's database.
///
/// One value serves all loops of a process. Every status transition it
/// performs is stamped with its [`InstanceId`].
#[derive(Debug)]
pub struct Connector<S> {
    pub(crate) instance_id: InstanceId,
    pub(crate) store: S,
    pub(crate) config: ConnectorConfig,
}

impl<S: MessageStore> Connector<S> {
    /// Creates a connector stamped with the process-wide instance id.
    #[must_use]
    pub fn new(store: S, config: ConnectorConfig) -> Self {
        Self {
            instance_id: InstanceId::current(),
            store,
            config,
        }
    }

    /// Replaces the instance id stamped on status transitions. Lets tests run
    /// several connectors in one process.
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Identifier written to `status_by`.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Loop timings and worker count.
    #[must_use]
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The message store the loops work on.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stages outbound messages in `tx`. Call this from a domain handler;
    /// the messages are sent once `tx` commits and dropped if it rolls back.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Serialization` if a value cannot be encoded
    /// and `ConnectorError::Database` if the insert fails.
    pub async fn add_outbox(
        &self,
        tx: &mut S::Tx,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError> {
        self.store
            .add_outbox_messages(tx, self.instance_id, messages)
            .await
    }
}

#[async_trait]
impl<S: MessageStore> OutboxWriter<S::Tx> for Connector<S> {
    async fn add_outbox_messages(
        &self,
        tx: &mut S::Tx,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError> {
        self.add_outbox(tx, messages).await
    }
}

/// Runs the reader, the processor and the outbox pump until `cancel` fires.
///
/// The loops recover from transient failures on their own, so in practice
/// this only returns once all three have observed the cancellation.
///
/// # Errors
///
/// Returns the first error a loop gives up with.
#[instrument(name = "connector", skip_all, fields(instance_id = %connector.instance_id))]
pub async fn run_connector<S, T, W, R, H>(
    cancel: &CancellationToken,
    connector: &Connector<S>,
    supplier: &T,
    writer: &W,
    reader: &R,
    handler: &H,
) -> Result<(), ConnectorError>
where
    S: MessageStore,
    T: TxSupplier<Tx = S::Tx>,
    W: BrokerWriter,
    R: BrokerReader,
    H: InboxHandler<S::Tx>,
{
    info!(
        pump_workers = connector.config.pump_workers,
        "starting inbox/outbox connector"
    );
    let result = tokio::try_join!(
        connector.pump_outgoing(cancel, supplier, writer),
        connector.read(cancel, supplier, reader),
        connector.process_incoming(cancel, supplier, handler),
    );
    // Tasks of the host sharing the token stop with the connector.
    cancel.cancel();
    result?;
    info!("inbox/outbox connector stopped");
    Ok(())
}

/// Outcome of a single loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    /// A message was handled and the transaction committed.
    Completed,
    /// There was nothing to do.
    Idle,
    /// The iteration failed before a message was selected.
    Failed,
    /// The iteration failed while working on the message with this id.
    FailedOn(i64),
}

/// Sleeps for `duration` unless `cancel` fires first.
pub(crate) async fn pause(
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<(), ConnectorError> {
    tokio::select! {
        () = cancel.cancelled() => Err(ConnectorError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Turns the cancellation that ended a loop into a clean return.
pub(crate) fn until_cancelled(result: Result<(), ConnectorError>) -> Result<(), ConnectorError> {
    match result {
        Err(ConnectorError::Cancelled) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use mds_core::tx::{Transaction, TxSupplier};
    use mds_test_support::InMemoryMessageStore;

    use super::*;

    #[tokio::test]
    async fn test_add_outbox_stamps_instance_and_stages_in_tx() {
        let store = InMemoryMessageStore::new();
        let instance = InstanceId::generate();
        let connector = Connector::new(store.clone(), ConnectorConfig::default())
            .with_instance_id(instance);
        let mut tx = store.begin().await.unwrap();

        connector
            .add_outbox(
                &mut tx,
                &[
                    OutboundMessage::new("U", "u-1", "ack", &serde_json::json!({"id": "u-1"}))
                        .unwrap(),
                ],
            )
            .await
            .unwrap();
        assert!(store.outbox_rows().is_empty());
        tx.commit().await.unwrap();

        let rows = store.outbox_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status_by, instance);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_returns_cancelled_when_token_fires() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pause(&cancel, Duration::from_secs(3600)).await;

        assert!(matches!(result, Err(ConnectorError::Cancelled)));
    }

    #[test]
    fn test_until_cancelled_keeps_other_errors() {
        assert!(until_cancelled(Err(ConnectorError::Cancelled)).is_ok());
        assert!(until_cancelled(Err(ConnectorError::Broker("down".into()))).is_err());
    }
}
