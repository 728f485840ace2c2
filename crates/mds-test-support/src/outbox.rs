//! Recording `OutboxWriter` for testing domain handlers without a store.

use std::sync::Mutex;

use async_trait::async_trait;
use mds_core::error::ConnectorError;
use mds_core::handler::OutboxWriter;
use mds_core::message::OutboundMessage;

/// An outbox writer that records every staged message. Works with any
/// transaction type.
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    messages: Mutex<Vec<OutboundMessage>>,
    fail: bool,
}

impl RecordingOutbox {
    /// Creates a writer that accepts all messages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer that rejects every call with a database error.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Returns a snapshot of all recorded messages.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl<Tx: Send> OutboxWriter<Tx> for RecordingOutbox {
    async fn add_outbox_messages(
        &self,
        _tx: &mut Tx,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError> {
        if self.fail {
            return Err(ConnectorError::Database("connection refused".into()));
        }
        self.messages.lock().unwrap().extend_from_slice(messages);
        Ok(())
    }
}
