//! Test brokers: scripted `BrokerReader`, recording `BrokerWriter` and stub
//! `TopicMetadata`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mds_core::broker::{BrokerReader, BrokerWriter, PartitionInfo, TopicMetadata};
use mds_core::codec::BrokerRecord;
use mds_core::error::ConnectorError;
use tokio::sync::Notify;

/// A reader that hands out records pushed by the test, in push order.
///
/// `fetch_message` waits until a record is available. Pushing the same record
/// several times simulates broker redelivery.
#[derive(Debug, Default)]
pub struct ScriptedReader {
    queue: Mutex<VecDeque<BrokerRecord>>,
    available: Notify,
    committed: Mutex<Vec<(String, i32, i64)>>,
    failing_fetches: Mutex<usize>,
    failing_commits: Mutex<usize>,
}

impl ScriptedReader {
    /// Creates an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a record for delivery.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn push(&self, record: BrokerRecord) {
        self.queue.lock().unwrap().push_back(record);
        self.available.notify_one();
    }

    /// Makes the next `n` fetches fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_fetches(&self, n: usize) {
        *self.failing_fetches.lock().unwrap() = n;
    }

    /// Makes the next `n` offset commits fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_commits(&self, n: usize) {
        *self.failing_commits.lock().unwrap() = n;
    }

    /// Returns `(topic, partition, offset)` of every committed record.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn committed(&self) -> Vec<(String, i32, i64)> {
        self.committed.lock().unwrap().clone()
    }

    /// Number of records not fetched yet.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn take_failure(counter: &Mutex<usize>) -> bool {
        let mut remaining = counter.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl BrokerReader for ScriptedReader {
    async fn fetch_message(&self) -> Result<BrokerRecord, ConnectorError> {
        if Self::take_failure(&self.failing_fetches) {
            return Err(ConnectorError::Broker("fetch message: broker unreachable".into()));
        }
        loop {
            let available = self.available.notified();
            let next = self.queue.lock().unwrap().pop_front();
            if let Some(record) = next {
                return Ok(record);
            }
            available.await;
        }
    }

    async fn commit_messages(&self, records: &[BrokerRecord]) -> Result<(), ConnectorError> {
        if Self::take_failure(&self.failing_commits) {
            return Err(ConnectorError::Broker("commit messages: group rebalancing".into()));
        }
        self.committed.lock().unwrap().extend(
            records
                .iter()
                .map(|record| (record.topic.clone(), record.partition, record.offset)),
        );
        Ok(())
    }
}

/// A writer that records every successfully written record in write order.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    written: Mutex<Vec<BrokerRecord>>,
    attempts: Mutex<usize>,
    failing_writes: Mutex<usize>,
    delay: Option<Duration>,
}

impl RecordingWriter {
    /// Creates a writer that acknowledges immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer that sleeps `delay` before acknowledging each batch.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Makes the next `n` writes fail without recording anything.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_writes(&self, n: usize) {
        *self.failing_writes.lock().unwrap() = n;
    }

    /// Returns all records written so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn written(&self) -> Vec<BrokerRecord> {
        self.written.lock().unwrap().clone()
    }

    /// Number of `write_messages` calls, including failed ones.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl BrokerWriter for RecordingWriter {
    async fn write_messages(&self, records: &[BrokerRecord]) -> Result<(), ConnectorError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if ScriptedReader::take_failure(&self.failing_writes) {
            return Err(ConnectorError::Broker("write messages: leader not available".into()));
        }
        self.written.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

/// Broker metadata that only knows the topics a test created.
#[derive(Debug, Default)]
pub struct StubTopicMetadata {
    topics: Mutex<BTreeMap<String, i32>>,
    reads: Mutex<usize>,
    failing_reads: Mutex<usize>,
}

impl StubTopicMetadata {
    /// Creates metadata without any topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `topic` visible with `partitions` partitions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn create_topic(&self, topic: impl Into<String>, partitions: i32) {
        self.topics.lock().unwrap().insert(topic.into(), partitions);
    }

    /// Makes the next `n` metadata reads fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_reads(&self, n: usize) {
        *self.failing_reads.lock().unwrap() = n;
    }

    /// Number of metadata reads, including failed ones.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }
}

#[async_trait]
impl TopicMetadata for StubTopicMetadata {
    async fn read_partitions(
        &self,
        topics: &[String],
    ) -> Result<Vec<PartitionInfo>, ConnectorError> {
        *self.reads.lock().unwrap() += 1;
        if ScriptedReader::take_failure(&self.failing_reads) {
            return Err(ConnectorError::Broker("read partitions: dial broker".into()));
        }
        let known = self.topics.lock().unwrap();
        Ok(topics
            .iter()
            .filter_map(|topic| known.get(topic).map(|partitions| (topic, *partitions)))
            .flat_map(|(topic, partitions)| {
                (0..partitions).map(move |partition| PartitionInfo {
                    topic: topic.clone(),
                    partition,
                })
            })
            .collect())
    }
}
