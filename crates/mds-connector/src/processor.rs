//! Processor loop: inbox messages into the domain handler.

use mds_core::error::ConnectorError;
use mds_core::handler::InboxHandler;
use mds_core::message::InboundMessage;
use mds_core::store::{InboxMessageStatus, MessageStore};
use mds_core::tx::{Transaction, TxSupplier};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::connector::{Attempt, Connector, pause, until_cancelled};
use crate::tx::finish_tx;

impl<S: MessageStore> Connector<S> {
    /// Hands pending inbox messages to `handler` until `cancel` fires.
    ///
    /// Each message is handled in its own transaction, which also marks the
    /// message processed. A failed attempt rolls back, pushes the message
    /// behind the other candidates and makes the next selection pick a
    /// random segment, so one poisoned message cannot starve the rest.
    ///
    /// # Errors
    ///
    /// Never fails in practice; cancellation returns `Ok(())`.
    #[instrument(name = "process_incoming", skip_all, fields(instance_id = %self.instance_id))]
    pub async fn process_incoming<T, H>(
        &self,
        cancel: &CancellationToken,
        supplier: &T,
        handler: &H,
    ) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
        H: InboxHandler<S::Tx>,
    {
        until_cancelled(self.process_loop(cancel, supplier, handler).await)
    }

    async fn process_loop<T, H>(
        &self,
        cancel: &CancellationToken,
        supplier: &T,
        handler: &H,
    ) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
        H: InboxHandler<S::Tx>,
    {
        let mut last_failed = false;
        loop {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }
            match self.process_next(supplier, handler, last_failed).await {
                Attempt::Completed => last_failed = false,
                Attempt::Idle => {
                    last_failed = false;
                    pause(cancel, self.config.poll_wait).await?;
                }
                Attempt::Failed => {
                    last_failed = true;
                    pause(cancel, self.config.error_cooldown).await?;
                }
                Attempt::FailedOn(id) => {
                    last_failed = true;
                    self.record_failed_attempt(supplier, id).await;
                    pause(cancel, self.config.error_cooldown).await?;
                }
            }
        }
    }

    async fn process_next<T, H>(&self, supplier: &T, handler: &H, select_random: bool) -> Attempt
    where
        T: TxSupplier<Tx = S::Tx>,
        H: InboxHandler<S::Tx>,
    {
        let mut tx = match supplier.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %err, "begin tx failed");
                return Attempt::Failed;
            }
        };
        let message = match self.store.next_inbox_message(&mut tx, select_random).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return match finish_tx(tx, Ok(()), self.config.commit_timeout).await {
                    Ok(()) => Attempt::Idle,
                    Err(err) => {
                        error!(error = %err, "commit idle tx failed");
                        Attempt::Failed
                    }
                };
            }
            Err(err) => {
                error!(error = %err, "select inbox message failed");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback tx failed");
                }
                return Attempt::Failed;
            }
        };

        let result = self.handle(&mut tx, handler, &message).await;
        match finish_tx(tx, result, self.config.commit_timeout).await {
            Ok(()) => {
                debug!(
                    message_id = message.id,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    event_type = %message.event_type,
                    "processed inbox message"
                );
                Attempt::Completed
            }
            Err(err) => {
                error!(
                    error = %err,
                    message_id = message.id,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key,
                    event_type = %message.event_type,
                    status_by = %self.instance_id,
                    "processing inbox message failed"
                );
                Attempt::FailedOn(message.id)
            }
        }
    }

    async fn handle<H: InboxHandler<S::Tx>>(
        &self,
        tx: &mut S::Tx,
        handler: &H,
        message: &InboundMessage,
    ) -> Result<(), ConnectorError> {
        handler
            .handle(tx, message)
            .await
            .map_err(ConnectorError::Handler)?;
        self.store
            .set_inbox_message_status(
                tx,
                self.instance_id,
                message.id,
                InboxMessageStatus::Processed,
            )
            .await
    }

    /// Advances `status_ts` of a message after a failed attempt so it ages
    /// behind the other candidates. Failures are only logged.
    async fn record_failed_attempt<T>(&self, supplier: &T, id: i64)
    where
        T: TxSupplier<Tx = S::Tx>,
    {
        if let Err(err) = self.touch(supplier, id).await {
            warn!(error = %err, message_id = id, "recording failed inbox attempt failed");
        }
    }

    async fn touch<T>(&self, supplier: &T, id: i64) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
    {
        let mut tx = supplier.begin().await?;
        let result = self
            .store
            .touch_inbox_message(&mut tx, self.instance_id, id)
            .await;
        finish_tx(tx, result, self.config.commit_timeout).await
    }
}
