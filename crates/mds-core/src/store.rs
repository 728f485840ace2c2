//! Inbox and outbox persistence seam.

use std::fmt;

use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::instance::InstanceId;
use crate::message::{InboundMessage, OutboundMessage};
use crate::tx::Transaction;

/// Lifecycle state of an inbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboxMessageStatus {
    Pending,
    Processed,
}

/// Lifecycle state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxMessageStatus {
    Pending,
    Sent,
}

/// Stored code of the pending state in both tables.
pub const STATUS_PENDING: i32 = 0;
/// Stored code of the terminal state in both tables.
pub const STATUS_TERMINAL: i32 = 200;

macro_rules! status_codes {
    ($ty:ident, $terminal:ident, $name:literal) => {
        impl $ty {
            /// Returns the integer stored in the `status` column.
            #[must_use]
            pub fn code(self) -> i32 {
                match self {
                    Self::Pending => STATUS_PENDING,
                    Self::$terminal => STATUS_TERMINAL,
                }
            }

            /// Returns `true` for the state a row never leaves.
            #[must_use]
            pub fn is_terminal(self) -> bool {
                matches!(self, Self::$terminal)
            }
        }

        impl TryFrom<i32> for $ty {
            type Error = ConnectorError;

            fn try_from(code: i32) -> Result<Self, Self::Error> {
                match code {
                    STATUS_PENDING => Ok(Self::Pending),
                    STATUS_TERMINAL => Ok(Self::$terminal),
                    other => Err(ConnectorError::internal(format!(
                        "unknown {} status code {other}",
                        $name
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    Self::Pending => f.write_str("pending"),
                    Self::$terminal => f.write_str(&stringify!($terminal).to_lowercase()),
                }
            }
        }
    };
}

status_codes!(InboxMessageStatus, Processed, "inbox");
status_codes!(OutboxMessageStatus, Sent, "outbox");

/// Persistence of inbox and outbox rows.
///
/// Every operation runs inside a caller-supplied transaction. Row locks taken
/// by the `next_*` operations are held until that transaction finishes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The transaction type the store operates in.
    type Tx: Transaction;

    /// Inserts received messages as pending. Messages whose
    /// `(topic, partition, offset)` already exists are skipped silently.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Database` on storage failures.
    async fn add_inbox_messages(
        &self,
        tx: &mut Self::Tx,
        instance: InstanceId,
        messages: &[InboundMessage],
    ) -> Result<(), ConnectorError>;

    /// Locks and returns the next inbox message to process.
    ///
    /// Each `(topic, partition, key)` segment offers its lowest pending
    /// offset. Among those the oldest `status_ts` wins, unless
    /// `select_random_segment` is set, in which case one candidate is picked
    /// at random. Rows locked by other transactions are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Database` on storage failures and
    /// `ConnectorError::Internal` for malformed rows.
    async fn next_inbox_message(
        &self,
        tx: &mut Self::Tx,
        select_random_segment: bool,
    ) -> Result<Option<InboundMessage>, ConnectorError>;

    /// Transitions a non-processed inbox message.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::NotFound` if the row is missing or already
    /// processed.
    async fn set_inbox_message_status(
        &self,
        tx: &mut Self::Tx,
        instance: InstanceId,
        id: i64,
        status: InboxMessageStatus,
    ) -> Result<(), ConnectorError>;

    /// Advances `status_ts` and `status_by` of a pending inbox message after a
    /// failed attempt, so it ages behind other candidates.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::NotFound` if the row is missing or already
    /// processed.
    async fn touch_inbox_message(
        &self,
        tx: &mut Self::Tx,
        instance: InstanceId,
        id: i64,
    ) -> Result<(), ConnectorError>;

    /// Stages messages for sending.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Serialization` if a value cannot be encoded and
    /// `ConnectorError::Database` on storage failures.
    async fn add_outbox_messages(
        &self,
        tx: &mut Self::Tx,
        instance: InstanceId,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError>;

    /// Locks and returns the next outbox message to send: the lowest pending
    /// id of its `(topic, key)` segment, lowest id first.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Database` on storage failures and
    /// `ConnectorError::Internal` for malformed rows.
    async fn next_outbox_message(
        &self,
        tx: &mut Self::Tx,
    ) -> Result<Option<OutboundMessage>, ConnectorError>;

    /// Transitions an outbox message.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::NotFound` if the row does not exist.
    async fn set_outbox_message_status(
        &self,
        tx: &mut Self::Tx,
        instance: InstanceId,
        id: i64,
        status: OutboxMessageStatus,
    ) -> Result<(), ConnectorError>;
}
