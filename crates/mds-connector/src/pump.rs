//! Outbox pump: outbox messages to the broker.

use mds_core::broker::BrokerWriter;
use mds_core::codec;
use mds_core::error::ConnectorError;
use mds_core::message::OutboundMessage;
use mds_core::store::{MessageStore, OutboxMessageStatus};
use mds_core::tx::{Transaction, TxSupplier};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::connector::{Attempt, Connector, pause, until_cancelled};
use crate::tx::finish_tx;

impl<S: MessageStore> Connector<S> {
    /// Sends pending outbox messages through `writer` until `cancel` fires.
    ///
    /// Runs `pump_workers` workers. Each locks the head of one `(topic, key)`
    /// segment, writes it and marks it sent in the same transaction, so a
    /// message stays pending until the broker acknowledged it and segments
    /// are sent in insertion order.
    ///
    /// # Errors
    ///
    /// Never fails in practice; cancellation returns `Ok(())`.
    #[instrument(
        name = "pump_outgoing",
        skip_all,
        fields(instance_id = %self.instance_id, workers = self.config.pump_workers)
    )]
    pub async fn pump_outgoing<T, W>(
        &self,
        cancel: &CancellationToken,
        supplier: &T,
        writer: &W,
    ) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
        W: BrokerWriter,
    {
        let workers = (0..self.config.pump_workers.max(1))
            .map(|worker| async move {
                until_cancelled(self.pump_loop(cancel, supplier, writer, worker).await)
            });
        futures::future::try_join_all(workers).await?;
        Ok(())
    }

    async fn pump_loop<T, W>(
        &self,
        cancel: &CancellationToken,
        supplier: &T,
        writer: &W,
        worker: usize,
    ) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
        W: BrokerWriter,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }
            match self.send_next(supplier, writer, worker).await {
                Attempt::Completed => {}
                Attempt::Idle => pause(cancel, self.config.poll_wait).await?,
                Attempt::Failed | Attempt::FailedOn(_) => {
                    pause(cancel, self.config.error_cooldown).await?;
                }
            }
        }
    }

    async fn send_next<T, W>(&self, supplier: &T, writer: &W, worker: usize) -> Attempt
    where
        T: TxSupplier<Tx = S::Tx>,
        W: BrokerWriter,
    {
        let mut tx = match supplier.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %err, worker, "begin tx failed");
                return Attempt::Failed;
            }
        };
        let message = match self.store.next_outbox_message(&mut tx).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return match finish_tx(tx, Ok(()), self.config.commit_timeout).await {
                    Ok(()) => Attempt::Idle,
                    Err(err) => {
                        error!(error = %err, worker, "commit idle tx failed");
                        Attempt::Failed
                    }
                };
            }
            Err(err) => {
                error!(error = %err, worker, "select outbox message failed");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, worker, "rollback tx failed");
                }
                return Attempt::Failed;
            }
        };

        let result = self.send(&mut tx, writer, &message).await;
        match finish_tx(tx, result, self.config.commit_timeout).await {
            Ok(()) => {
                debug!(
                    worker,
                    message_id = message.id,
                    topic = %message.topic,
                    key = %message.key,
                    event_type = %message.event_type,
                    "sent outbox message"
                );
                Attempt::Completed
            }
            Err(err) => {
                error!(
                    error = %err,
                    worker,
                    message_id = message.id,
                    topic = %message.topic,
                    key = %message.key,
                    event_type = %message.event_type,
                    status_by = %self.instance_id,
                    "sending outbox message failed"
                );
                Attempt::FailedOn(message.id)
            }
        }
    }

    async fn send<W: BrokerWriter>(
        &self,
        tx: &mut S::Tx,
        writer: &W,
        message: &OutboundMessage,
    ) -> Result<(), ConnectorError> {
        let record = codec::encode(message)?;
        let write_timeout = self.config.write_timeout;
        tokio::time::timeout(write_timeout, writer.write_messages(std::slice::from_ref(&record)))
            .await
            .map_err(|_| ConnectorError::Timeout {
                operation: "write messages",
                after: write_timeout,
            })??;
        self.store
            .set_outbox_message_status(tx, self.instance_id, message.id, OutboxMessageStatus::Sent)
            .await
    }
}
