//! Contracts between the connector and the hosting service's domain code.

use async_trait::async_trait;

use crate::error::{ConnectorError, HandlerError};
use crate::message::{InboundMessage, OutboundMessage};

/// Domain handler for inbox messages.
///
/// Implementations dispatch on `(topic, event_type)`, apply every side effect
/// through `tx`, and must be idempotent: a crash between handler return and
/// commit delivers the same message again. Outgoing events go through an
/// [`OutboxWriter`] on the same transaction, never directly to the broker.
#[async_trait]
pub trait InboxHandler<Tx: Send>: Send + Sync {
    /// Handles one message.
    ///
    /// # Errors
    ///
    /// Any error rolls the transaction back and leaves the message pending.
    async fn handle(&self, tx: &mut Tx, message: &InboundMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<Tx, H> InboxHandler<Tx> for std::sync::Arc<H>
where
    Tx: Send,
    H: InboxHandler<Tx> + ?Sized,
{
    async fn handle(&self, tx: &mut Tx, message: &InboundMessage) -> Result<(), HandlerError> {
        (**self).handle(tx, message).await
    }
}

/// Stages outbound messages inside a domain transaction.
#[async_trait]
pub trait OutboxWriter<Tx: Send>: Send + Sync {
    /// Adds messages to the outbox. They are sent once `tx` commits.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the messages cannot be staged.
    async fn add_outbox_messages(
        &self,
        tx: &mut Tx,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError>;
}

#[async_trait]
impl<Tx, W> OutboxWriter<Tx> for std::sync::Arc<W>
where
    Tx: Send,
    W: OutboxWriter<Tx> + ?Sized,
{
    async fn add_outbox_messages(
        &self,
        tx: &mut Tx,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError> {
        (**self).add_outbox_messages(tx, messages).await
    }
}
