//! `PostgreSQL` implementation of the `MessageStore` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;

use mds_core::clock::{Clock, SystemClock};
use mds_core::error::ConnectorError;
use mds_core::instance::InstanceId;
use mds_core::message::{
    InboundMessage, OutboundMessage, OutboundValue, join_headers, split_headers,
};
use mds_core::rng::{RandomSource, ThreadRandom};
use mds_core::store::{
    InboxMessageStatus, MessageStore, OutboxMessageStatus, STATUS_PENDING,
};

use crate::pg_tx::PgTx;

/// Rows per insert statement. Keeps the bind count below the protocol limit.
const INSERT_CHUNK_SIZE: usize = 1000;

const INBOX_INSERT_PREFIX: &str = r#"
INSERT INTO __message_inbox (
    topic, partition, "offset", ts, high_water_mark, key, value, event_type,
    header_keys, header_values, status, status_ts, status_by
) "#;

const OUTBOX_INSERT_PREFIX: &str = r"
INSERT INTO __message_outbox (
    topic, created, key, value, event_type,
    header_keys, header_values, status, status_ts, status_by
) ";

// `status <> 200` must stay a literal: the partial indexes on both tables only
// match it in generic plans when it is spelled the same way.
const INBOX_CANDIDATES_QUERY: &str = r#"
SELECT m.id
FROM __message_inbox m
INNER JOIN (
    SELECT topic, partition, key, MIN("offset") AS "offset"
    FROM __message_inbox
    WHERE status <> 200
    GROUP BY topic, partition, key
) oldest_pending
    ON m.status <> 200
    AND m.topic = oldest_pending.topic
    AND m.partition = oldest_pending.partition
    AND m."offset" = oldest_pending."offset"
ORDER BY m.id
"#;

const INBOX_LOCK_QUERY: &str = r#"
SELECT id, topic, partition, "offset", ts, high_water_mark, key, value, event_type,
       header_keys, header_values
FROM __message_inbox
WHERE status <> 200 AND id = ANY($1) AND status = $2
ORDER BY status_ts, id
LIMIT 1
FOR UPDATE SKIP LOCKED
"#;

const OUTBOX_CANDIDATES_QUERY: &str = r"
SELECT MIN(id)
FROM __message_outbox
WHERE status <> 200
GROUP BY topic, key
ORDER BY 1
";

const OUTBOX_LOCK_QUERY: &str = r"
SELECT id, topic, key, value, event_type, header_keys, header_values
FROM __message_outbox
WHERE status <> 200 AND id = ANY($1) AND status = $2
ORDER BY id
LIMIT 1
FOR UPDATE SKIP LOCKED
";

#[derive(Debug, sqlx::FromRow)]
struct InboxRecord {
    id: i64,
    topic: String,
    partition: i32,
    offset: i64,
    ts: DateTime<Utc>,
    high_water_mark: i64,
    key: String,
    value: String,
    event_type: String,
    header_keys: Vec<String>,
    header_values: Vec<String>,
}

impl TryFrom<InboxRecord> for InboundMessage {
    type Error = ConnectorError;

    fn try_from(record: InboxRecord) -> Result<Self, Self::Error> {
        let headers = join_headers(record.header_keys, record.header_values).map_err(|e| {
            ConnectorError::internal(format!(
                "inbox message {} ({} partition {} offset {}): {e}",
                record.id, record.topic, record.partition, record.offset
            ))
        })?;
        Ok(InboundMessage {
            id: record.id,
            topic: record.topic,
            partition: record.partition,
            offset: record.offset,
            high_water_mark: record.high_water_mark,
            ts: record.ts,
            key: record.key,
            event_type: record.event_type,
            raw_value: record.value.into_bytes(),
            headers,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRecord {
    id: i64,
    topic: String,
    key: String,
    value: String,
    event_type: String,
    header_keys: Vec<String>,
    header_values: Vec<String>,
}

impl TryFrom<OutboxRecord> for OutboundMessage {
    type Error = ConnectorError;

    fn try_from(record: OutboxRecord) -> Result<Self, Self::Error> {
        let headers = join_headers(record.header_keys, record.header_values).map_err(|e| {
            ConnectorError::internal(format!("outbox message {}: {e}", record.id))
        })?;
        Ok(OutboundMessage {
            id: record.id,
            topic: record.topic,
            key: record.key,
            event_type: record.event_type,
            value: OutboundValue::Raw(record.value.into_bytes()),
            headers,
        })
    }
}

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> ConnectorError {
    move |e| ConnectorError::Database(format!("{context}: {e}"))
}

/// PostgreSQL-backed inbox and outbox.
///
/// Stateless apart from its clock and random source; every operation runs on
/// the caller's [`PgTx`].
#[derive(Clone)]
pub struct PgMessageStore {
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for PgMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMessageStore").finish_non_exhaustive()
    }
}

impl Default for PgMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PgMessageStore {
    /// Creates a new `PgMessageStore` using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            rng: Arc::new(ThreadRandom),
        }
    }

    /// Replaces the clock used for `status_ts` and `created`.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the source used for random segment selection.
    #[must_use]
    pub fn with_rng(mut self, rng: impl RandomSource + 'static) -> Self {
        self.rng = Arc::new(rng);
        self
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    type Tx = PgTx;

    async fn add_inbox_messages(
        &self,
        tx: &mut PgTx,
        instance: InstanceId,
        messages: &[InboundMessage],
    ) -> Result<(), ConnectorError> {
        let now = self.clock.now();
        for chunk in messages.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Postgres>::new(
                INBOX_INSERT_PREFIX,
            );
            builder.push_values(chunk, |mut row, message| {
                let (header_keys, header_values) = split_headers(&message.headers);
                row.push_bind(message.topic.clone())
                    .push_bind(message.partition)
                    .push_bind(message.offset)
                    .push_bind(message.ts)
                    .push_bind(message.high_water_mark)
                    .push_bind(message.key.clone())
                    .push_bind(String::from_utf8_lossy(&message.raw_value).into_owned())
                    .push_bind(message.event_type.clone())
                    .push_bind(header_keys)
                    .push_bind(header_values)
                    .push_bind(STATUS_PENDING)
                    .push_bind(now)
                    .push_bind(instance.as_uuid());
            });
            builder.push(r#" ON CONFLICT (topic, partition, "offset") DO NOTHING"#);
            let result = builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(db_err("insert inbox messages"))?;
            let skipped = (chunk.len() as u64).saturating_sub(result.rows_affected());
            if skipped > 0 {
                debug!(skipped, "skipped already received inbox messages");
            }
        }
        Ok(())
    }

    async fn next_inbox_message(
        &self,
        tx: &mut PgTx,
        select_random_segment: bool,
    ) -> Result<Option<InboundMessage>, ConnectorError> {
        let mut candidates: Vec<i64> = sqlx::query_scalar(INBOX_CANDIDATES_QUERY)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_err("query inbox candidates"))?;
        if candidates.is_empty() {
            return Ok(None);
        }
        if select_random_segment {
            let pick = self.rng.next_index(candidates.len()).min(candidates.len() - 1);
            candidates = vec![candidates[pick]];
        }
        let record: Option<InboxRecord> = sqlx::query_as(INBOX_LOCK_QUERY)
            .bind(&candidates)
            .bind(STATUS_PENDING)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err("lock next inbox message"))?;
        record.map(InboundMessage::try_from).transpose()
    }

    async fn set_inbox_message_status(
        &self,
        tx: &mut PgTx,
        instance: InstanceId,
        id: i64,
        status: InboxMessageStatus,
    ) -> Result<(), ConnectorError> {
        let result = sqlx::query(
            "UPDATE __message_inbox SET status = $1, status_ts = $2, status_by = $3 \
             WHERE status <> 200 AND id = $4",
        )
        .bind(status.code())
        .bind(self.clock.now())
        .bind(instance.as_uuid())
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(db_err("update inbox message status"))?;
        if result.rows_affected() == 0 {
            return Err(ConnectorError::NotFound(format!(
                "inbox message {id} not found or already processed"
            )));
        }
        Ok(())
    }

    async fn touch_inbox_message(
        &self,
        tx: &mut PgTx,
        instance: InstanceId,
        id: i64,
    ) -> Result<(), ConnectorError> {
        let result = sqlx::query(
            "UPDATE __message_inbox SET status_ts = $1, status_by = $2 \
             WHERE status <> 200 AND id = $3",
        )
        .bind(self.clock.now())
        .bind(instance.as_uuid())
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(db_err("touch inbox message"))?;
        if result.rows_affected() == 0 {
            return Err(ConnectorError::NotFound(format!(
                "inbox message {id} not found or already processed"
            )));
        }
        Ok(())
    }

    async fn add_outbox_messages(
        &self,
        tx: &mut PgTx,
        instance: InstanceId,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError> {
        let now = self.clock.now();
        let mut encoded = Vec::with_capacity(messages.len());
        for message in messages {
            let value = String::from_utf8(message.value.to_bytes()?).map_err(|e| {
                ConnectorError::internal(format!(
                    "outbound {} value for {} is not UTF-8: {e}",
                    message.event_type, message.topic
                ))
            })?;
            encoded.push((message, value));
        }
        for chunk in encoded.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Postgres>::new(
                OUTBOX_INSERT_PREFIX,
            );
            builder.push_values(chunk, |mut row, (message, value)| {
                let (header_keys, header_values) = split_headers(&message.headers);
                row.push_bind(message.topic.clone())
                    .push_bind(now)
                    .push_bind(message.key.clone())
                    .push_bind(value.clone())
                    .push_bind(message.event_type.clone())
                    .push_bind(header_keys)
                    .push_bind(header_values)
                    .push_bind(STATUS_PENDING)
                    .push_bind(now)
                    .push_bind(instance.as_uuid());
            });
            builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(db_err("insert outbox messages"))?;
        }
        Ok(())
    }

    async fn next_outbox_message(
        &self,
        tx: &mut PgTx,
    ) -> Result<Option<OutboundMessage>, ConnectorError> {
        let candidates: Vec<i64> = sqlx::query_scalar(OUTBOX_CANDIDATES_QUERY)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_err("query outbox candidates"))?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let record: Option<OutboxRecord> = sqlx::query_as(OUTBOX_LOCK_QUERY)
            .bind(&candidates)
            .bind(STATUS_PENDING)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err("lock next outbox message"))?;
        record.map(OutboundMessage::try_from).transpose()
    }

    async fn set_outbox_message_status(
        &self,
        tx: &mut PgTx,
        instance: InstanceId,
        id: i64,
        status: OutboxMessageStatus,
    ) -> Result<(), ConnectorError> {
        let result = sqlx::query(
            "UPDATE __message_outbox SET status = $1, status_ts = $2, status_by = $3 WHERE id = $4",
        )
        .bind(status.code())
        .bind(self.clock.now())
        .bind(instance.as_uuid())
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(db_err("update outbox message status"))?;
        if result.rows_affected() == 0 {
            return Err(ConnectorError::NotFound(format!("outbox message {id} not found")));
        }
        Ok(())
    }
}
