//! Kafka adapters for the broker seams, built on `rdkafka`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use mds_core::broker::{BrokerReader, BrokerWriter, PartitionInfo, TopicMetadata};
use mds_core::codec::{BrokerHeader, BrokerRecord, UNASSIGNED};
use mds_core::error::ConnectorError;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::debug;

use crate::config::KafkaConfig;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const WATERMARK_TIMEOUT: Duration = Duration::from_secs(1);

fn kafka_err(context: &'static str) -> impl FnOnce(rdkafka::error::KafkaError) -> ConnectorError {
    move |err| ConnectorError::Broker(format!("{context}: {err}"))
}

fn join_err(context: &'static str) -> impl FnOnce(tokio::task::JoinError) -> ConnectorError {
    move |err| ConnectorError::Broker(format!("{context}: {err}"))
}

/// Offset to commit per partition: one past the highest record read.
fn next_offsets(records: &[BrokerRecord]) -> BTreeMap<(&str, i32), i64> {
    let mut next_offsets: BTreeMap<(&str, i32), i64> = BTreeMap::new();
    for record in records {
        let next = next_offsets
            .entry((record.topic.as_str(), record.partition))
            .or_insert(record.offset + 1);
        *next = (*next).max(record.offset + 1);
    }
    next_offsets
}

fn producer_config(config: &KafkaConfig, delivery_timeout: Duration) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.addr)
        .set("message.send.max.retries", config.max_attempts.to_string())
        .set("batch.num.messages", config.batch_size.to_string())
        .set("linger.ms", config.batch_timeout.as_millis().to_string())
        .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
        .set("acks", "all");
    client_config
}

/// Consumer-group reader with manual offset commits.
pub struct KafkaReader {
    consumer: Arc<StreamConsumer>,
    high_water_marks: Arc<Mutex<HashMap<(String, i32), i64>>>,
}

impl std::fmt::Debug for KafkaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaReader").finish_non_exhaustive()
    }
}

impl KafkaReader {
    /// Joins the consumer group of `config` and subscribes to `topics`.
    /// Partitions without a committed offset start at the earliest record.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Broker` if the consumer cannot be created or
    /// subscribed.
    pub fn new(config: &KafkaConfig, topics: &[String]) -> Result<Self, ConnectorError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.addr)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(kafka_err("create consumer"))?;
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(kafka_err("subscribe"))?;
        Ok(Self {
            consumer: Arc::new(consumer),
            high_water_marks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn record(message: &BorrowedMessage<'_>) -> BrokerRecord {
        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|header| BrokerHeader::new(header.key, header.value.unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();
        BrokerRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            high_water_mark: UNASSIGNED.into(),
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis),
            key: message.key().unwrap_or_default().to_vec(),
            value: message.payload().unwrap_or_default().to_vec(),
            headers,
        }
    }

    /// Returns the high-water mark of the record's partition. The cached value
    /// is refreshed once the partition has been read up to it.
    async fn high_water_mark(&self, topic: &str, partition: i32, offset: i64) -> i64 {
        let partition_key = (topic.to_string(), partition);
        let cached = self
            .high_water_marks
            .lock()
            .ok()
            .and_then(|marks| marks.get(&partition_key).copied());
        if let Some(high) = cached.filter(|high| *high > offset) {
            return high;
        }

        let consumer = Arc::clone(&self.consumer);
        let (owned_topic, owned_partition) = partition_key.clone();
        let fetched = tokio::task::spawn_blocking(move || {
            consumer.fetch_watermarks(&owned_topic, owned_partition, WATERMARK_TIMEOUT)
        })
        .await;
        match fetched {
            Ok(Ok((_, high))) => {
                if let Ok(mut marks) = self.high_water_marks.lock() {
                    marks.insert(partition_key, high);
                }
                high
            }
            Ok(Err(err)) => {
                debug!(error = %err, "fetch watermarks failed");
                cached.unwrap_or(UNASSIGNED.into())
            }
            Err(err) => {
                debug!(error = %err, "fetch watermarks task failed");
                cached.unwrap_or(UNASSIGNED.into())
            }
        }
    }
}

#[async_trait]
impl BrokerReader for KafkaReader {
    async fn fetch_message(&self) -> Result<BrokerRecord, ConnectorError> {
        let mut record = {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(kafka_err("fetch message"))?;
            Self::record(&message)
        };
        record.high_water_mark = self
            .high_water_mark(&record.topic, record.partition, record.offset)
            .await;
        Ok(record)
    }

    async fn commit_messages(&self, records: &[BrokerRecord]) -> Result<(), ConnectorError> {
        let next_offsets = next_offsets(records);
        if next_offsets.is_empty() {
            return Ok(());
        }
        let mut offsets = TopicPartitionList::new();
        for ((topic, partition), next) in next_offsets {
            offsets
                .add_partition_offset(topic, partition, Offset::Offset(next))
                .map_err(kafka_err("commit messages"))?;
        }

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(join_err("commit messages"))?
            .map_err(kafka_err("commit messages"))
    }
}

/// Producer writing records with their headers.
pub struct KafkaWriter {
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaWriter").finish_non_exhaustive()
    }
}

impl KafkaWriter {
    /// Creates a producer using the retry and batching settings of `config`.
    /// A record not acknowledged within `delivery_timeout` fails instead of
    /// staying queued, so a timed-out write is not delivered later.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Broker` if the producer cannot be created.
    pub fn new(config: &KafkaConfig, delivery_timeout: Duration) -> Result<Self, ConnectorError> {
        let producer: FutureProducer = producer_config(config, delivery_timeout)
            .create()
            .map_err(kafka_err("create producer"))?;
        Ok(Self { producer })
    }

    async fn write(&self, record: &BrokerRecord) -> Result<(), ConnectorError> {
        let headers = record.headers.iter().fold(
            OwnedHeaders::new_with_capacity(record.headers.len()),
            |headers, header| {
                headers.insert(Header {
                    key: &header.key,
                    value: Some(&header.value),
                })
            },
        );
        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.value)
            .headers(headers);
        self.producer
            .send(future_record, Timeout::Never)
            .await
            .map(|_| ())
            .map_err(|(err, _)| {
                ConnectorError::Broker(format!("write message to {}: {err}", record.topic))
            })
    }
}

#[async_trait]
impl BrokerWriter for KafkaWriter {
    async fn write_messages(&self, records: &[BrokerRecord]) -> Result<(), ConnectorError> {
        futures::future::try_join_all(records.iter().map(|record| self.write(record))).await?;
        Ok(())
    }
}

/// Reads topic metadata through a short-lived client per call.
#[derive(Debug, Clone)]
pub struct KafkaTopicMetadata {
    addr: String,
}

impl KafkaTopicMetadata {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl TopicMetadata for KafkaTopicMetadata {
    async fn read_partitions(
        &self,
        topics: &[String],
    ) -> Result<Vec<PartitionInfo>, ConnectorError> {
        let addr = self.addr.clone();
        let wanted = topics.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<PartitionInfo>, ConnectorError> {
            let client: BaseConsumer = ClientConfig::new()
                .set("bootstrap.servers", &addr)
                .create()
                .map_err(kafka_err("dial broker"))?;
            let metadata = client
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map_err(kafka_err("read partitions"))?;
            Ok(metadata
                .topics()
                .iter()
                .filter(|topic| topic.error().is_none() && wanted.iter().any(|w| w == topic.name()))
                .flat_map(|topic| {
                    topic.partitions().iter().map(|partition| PartitionInfo {
                        topic: topic.name().to_string(),
                        partition: partition.id(),
                    })
                })
                .collect())
        })
        .await
        .map_err(join_err("read partitions"))?
    }
}
