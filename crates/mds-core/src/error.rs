//! Connector error types.

use std::time::Duration;

use thiserror::Error;

/// Error returned by a domain handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type of the inbox/outbox connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A schema or state invariant was violated. Operators must intervene.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// JSON encoding of a payload failed.
    #[error("serialization failed ({context}): {source}")]
    Serialization {
        /// What was being serialized, including the failing payload.
        context: String,
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A row expected by a status update does not exist or is already terminal.
    #[error("message not found: {0}")]
    NotFound(String),

    /// A database or connection error.
    #[error("database error: {0}")]
    Database(String),

    /// An event broker error.
    #[error("broker error: {0}")]
    Broker(String),

    /// The domain handler rejected an inbound message.
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// A bounded operation did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The surrounding task was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl ConnectorError {
    /// Creates an [`ConnectorError::Internal`] from anything printable.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that indicate broken data rather than
    /// unavailable infrastructure.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. } | Self::Serialization { .. })
    }

    /// Returns `true` if the error stems from cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
