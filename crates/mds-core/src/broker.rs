//! Event broker seams.

use async_trait::async_trait;

use crate::codec::BrokerRecord;
use crate::error::ConnectorError;

/// Consumer-group side of the event log.
#[async_trait]
pub trait BrokerReader: Send + Sync {
    /// Waits for the next record. Dropping the future abandons the fetch.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Broker` if the fetch fails.
    async fn fetch_message(&self) -> Result<BrokerRecord, ConnectorError>;

    /// Commits the consumer-group offsets past the given records.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Broker` if the commit fails.
    async fn commit_messages(&self, records: &[BrokerRecord]) -> Result<(), ConnectorError>;
}

/// Producer side of the event log.
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    /// Writes the records and waits until the broker acknowledged all of them.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Broker` if any record could not be written.
    async fn write_messages(&self, records: &[BrokerRecord]) -> Result<(), ConnectorError>;
}

/// One partition of a topic as reported by broker metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionInfo {
    /// Topic name.
    pub topic: String,
    /// Partition id within the topic.
    pub partition: i32,
}

/// Broker metadata lookups.
#[async_trait]
pub trait TopicMetadata: Send + Sync {
    /// Lists the partitions of those `topics` that exist. Unknown topics are
    /// left out of the result.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Broker` if the broker cannot be reached.
    async fn read_partitions(
        &self,
        topics: &[String],
    ) -> Result<Vec<PartitionInfo>, ConnectorError>;
}
