//! Shared test helpers for connector integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mds_connector::{Connector, ConnectorConfig};
use mds_core::clock::Clock;
use mds_core::codec::{self, BrokerHeader, BrokerRecord, EVENT_TYPE_HEADER};
use mds_core::error::{ConnectorError, HandlerError};
use mds_core::handler::{InboxHandler, OutboxWriter};
use mds_core::instance::InstanceId;
use mds_core::message::{InboundMessage, OutboundMessage};
use mds_core::store::MessageStore;
use mds_core::tx::{Transaction, TxSupplier};
use mds_test_support::{InMemoryMessageStore, MemTx};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Fixed timestamp used across all integration tests.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// A clock that moves one second forward on every read.
#[derive(Debug)]
pub struct TickingClock(AtomicI64);

impl TickingClock {
    pub fn new() -> Self {
        Self(AtomicI64::new(fixed_now().timestamp()))
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.0.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).unwrap()
    }
}

/// Connector timings used by the tests. Time is paused in every async test,
/// so these only shape the order of events.
pub fn test_config() -> ConnectorConfig {
    ConnectorConfig::default()
}

/// Build a connector around `store` with a fresh instance id.
pub fn connector(store: &InMemoryMessageStore) -> Arc<Connector<InMemoryMessageStore>> {
    Arc::new(Connector::new(store.clone(), test_config()).with_instance_id(InstanceId::generate()))
}

/// A received record with an `event-type` header and a JSON value.
pub fn broker_record(
    topic: &str,
    partition: i32,
    offset: i64,
    key: &str,
    event_type: &str,
    value: &Value,
) -> BrokerRecord {
    let mut record = BrokerRecord::outgoing(
        topic,
        key.as_bytes(),
        serde_json::to_vec(value).unwrap(),
    );
    record.partition = partition;
    record.offset = offset;
    record.timestamp = Some(fixed_now());
    record.headers.push(BrokerHeader::new(EVENT_TYPE_HEADER, event_type));
    record
}

/// Insert records into the inbox in one committed transaction, in the given
/// order.
pub async fn seed_inbox(store: &InMemoryMessageStore, records: &[BrokerRecord]) {
    let messages: Vec<InboundMessage> = records.iter().map(codec::decode).collect();
    let mut tx = store.begin().await.unwrap();
    store
        .add_inbox_messages(&mut tx, InstanceId::generate(), &messages)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

/// Stage outbound messages in one committed transaction, in the given order.
pub async fn seed_outbox(
    connector: &Connector<InMemoryMessageStore>,
    messages: &[OutboundMessage],
) {
    let mut tx = connector.store().begin().await.unwrap();
    connector.add_outbox(&mut tx, messages).await.unwrap();
    tx.commit().await.unwrap();
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// Panics if the condition does not hold within ten virtual minutes.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..60_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within ten minutes");
}

/// Run `task` until `condition` holds, then cancel it and return its result.
pub async fn run_until<F>(
    cancel: &CancellationToken,
    task: F,
    condition: impl FnMut() -> bool,
) -> Result<(), ConnectorError>
where
    F: Future<Output = Result<(), ConnectorError>>,
{
    let stop = async {
        eventually(condition).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(task, stop);
    result
}

type FailWhen = Box<dyn Fn(&InboundMessage) -> bool + Send + Sync>;

/// Domain handler that records every invocation.
///
/// Each invocation records a side effect on the transaction. A handler built
/// with [`RecordingHandler::acking`] answers every message with an `ack`
/// event on topic `U`, keyed by the `id` field of the received value. The
/// failure predicate is checked last, so a failing invocation has already
/// staged its side effect and its outbound message.
pub struct RecordingHandler {
    calls: Mutex<Vec<InboundMessage>>,
    fail_when: FailWhen,
    outbox: Option<Arc<dyn OutboxWriter<MemTx>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_when: Box::new(|_| false),
            outbox: None,
        }
    }

    pub fn acking(outbox: Arc<dyn OutboxWriter<MemTx>>) -> Self {
        Self {
            outbox: Some(outbox),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn failing_when(
        mut self,
        fail_when: impl Fn(&InboundMessage) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fail_when = Box::new(fail_when);
        self
    }

    pub fn calls(&self) -> Vec<InboundMessage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with_key(&self, key: &str) -> usize {
        self.calls().iter().filter(|m| m.key == key).count()
    }
}

#[async_trait]
impl InboxHandler<MemTx> for RecordingHandler {
    async fn handle(&self, tx: &mut MemTx, message: &InboundMessage) -> Result<(), HandlerError> {
        self.calls.lock().unwrap().push(message.clone());
        tx.record_side_effect(format!(
            "{}/{}/{}",
            message.topic, message.partition, message.offset
        ));
        if let Some(outbox) = &self.outbox {
            let value: Value = message.value()?;
            let id = value["id"].as_str().unwrap_or_default().to_string();
            let ack = OutboundMessage::new("U", id, "ack", &value)?;
            outbox.add_outbox_messages(tx, &[ack]).await?;
        }
        // Hold the row lock across a yield so concurrent workers interleave.
        tokio::task::yield_now().await;
        if (self.fail_when)(message) {
            return Err(format!("rejecting {} at offset {}", message.key, message.offset).into());
        }
        Ok(())
    }
}

/// Parse the JSON value of a written record.
pub fn json_value(record: &BrokerRecord) -> Value {
    serde_json::from_slice(&record.value).unwrap()
}

/// Value `{"id": id}` used by most scenarios.
pub fn id_value(id: &str) -> Value {
    json!({ "id": id })
}
