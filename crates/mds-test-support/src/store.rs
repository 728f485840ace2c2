//! In-memory transactional message store.
//!
//! Mirrors the PostgreSQL store closely enough to exercise the connector
//! loops: writes are staged per transaction and applied on commit, `next_*`
//! takes row locks that other transactions skip, and locks are released when
//! the transaction commits, rolls back or is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mds_core::clock::{Clock, SystemClock};
use mds_core::error::ConnectorError;
use mds_core::instance::InstanceId;
use mds_core::message::{InboundMessage, OutboundMessage, OutboundValue};
use mds_core::rng::{RandomSource, ThreadRandom};
use mds_core::store::{InboxMessageStatus, MessageStore, OutboxMessageStatus};
use mds_core::tx::{Transaction, TxSupplier};

/// Snapshot of a stored inbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxRow {
    pub message: InboundMessage,
    pub status: InboxMessageStatus,
    pub status_ts: DateTime<Utc>,
    pub status_by: InstanceId,
}

/// Snapshot of a stored outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub message: OutboundMessage,
    pub created: DateTime<Utc>,
    pub status: OutboxMessageStatus,
    pub status_ts: DateTime<Utc>,
    pub status_by: InstanceId,
}

#[derive(Debug)]
enum StagedOp {
    AddInbox(InstanceId, Vec<InboundMessage>),
    SetInboxStatus(InstanceId, i64, InboxMessageStatus),
    TouchInbox(InstanceId, i64),
    AddOutbox(InstanceId, Vec<OutboundMessage>),
    SetOutboxStatus(InstanceId, i64, OutboxMessageStatus),
    SideEffect(String),
}

#[derive(Debug, Default)]
struct MemState {
    next_tx: u64,
    next_inbox_id: i64,
    next_outbox_id: i64,
    inbox: BTreeMap<i64, InboxRow>,
    outbox: BTreeMap<i64, OutboxRow>,
    inbox_locks: HashMap<i64, u64>,
    outbox_locks: HashMap<i64, u64>,
    processed: Vec<InboundMessage>,
    sent: Vec<OutboundMessage>,
    side_effects: Vec<String>,
    segment_overlaps: usize,
    max_concurrent_outbox_locks: usize,
    failing_begins: usize,
    failing_commits: usize,
    failing_selects: usize,
    commits: usize,
    rollbacks: usize,
}

impl MemState {
    fn take_select_failure(&mut self) -> Result<(), ConnectorError> {
        if self.failing_selects > 0 {
            self.failing_selects -= 1;
            return Err(ConnectorError::Database("select failed: statement timeout".into()));
        }
        Ok(())
    }

    fn release(&mut self, tx_id: u64) {
        self.inbox_locks.retain(|_, holder| *holder != tx_id);
        self.outbox_locks.retain(|_, holder| *holder != tx_id);
    }

    fn apply(&mut self, op: StagedOp, now: DateTime<Utc>) {
        match op {
            StagedOp::AddInbox(instance, messages) => {
                for mut message in messages {
                    let duplicate = self.inbox.values().any(|row| {
                        row.message.topic == message.topic
                            && row.message.partition == message.partition
                            && row.message.offset == message.offset
                    });
                    if duplicate {
                        continue;
                    }
                    self.next_inbox_id += 1;
                    message.id = self.next_inbox_id;
                    self.inbox.insert(
                        message.id,
                        InboxRow {
                            message,
                            status: InboxMessageStatus::Pending,
                            status_ts: now,
                            status_by: instance,
                        },
                    );
                }
            }
            StagedOp::SetInboxStatus(instance, id, status) => {
                if let Some(row) = self.inbox.get_mut(&id) {
                    row.status = status;
                    row.status_ts = now;
                    row.status_by = instance;
                    if status.is_terminal() {
                        self.processed.push(row.message.clone());
                    }
                }
            }
            StagedOp::TouchInbox(instance, id) => {
                if let Some(row) = self.inbox.get_mut(&id) {
                    row.status_ts = now;
                    row.status_by = instance;
                }
            }
            StagedOp::AddOutbox(instance, messages) => {
                for mut message in messages {
                    self.next_outbox_id += 1;
                    message.id = self.next_outbox_id;
                    self.outbox.insert(
                        message.id,
                        OutboxRow {
                            message,
                            created: now,
                            status: OutboxMessageStatus::Pending,
                            status_ts: now,
                            status_by: instance,
                        },
                    );
                }
            }
            StagedOp::SetOutboxStatus(instance, id, status) => {
                if let Some(row) = self.outbox.get_mut(&id) {
                    row.status = status;
                    row.status_ts = now;
                    row.status_by = instance;
                    if status.is_terminal() {
                        self.sent.push(row.message.clone());
                    }
                }
            }
            StagedOp::SideEffect(effect) => self.side_effects.push(effect),
        }
    }

    fn inbox_segment(&self, id: i64) -> Option<(String, i32, String)> {
        self.inbox.get(&id).map(|row| {
            (
                row.message.topic.clone(),
                row.message.partition,
                row.message.key.clone(),
            )
        })
    }

    fn outbox_segment(&self, id: i64) -> Option<(String, String)> {
        self.outbox
            .get(&id)
            .map(|row| (row.message.topic.clone(), row.message.key.clone()))
    }
}

/// Transaction of the in-memory store.
pub struct MemTx {
    id: u64,
    state: Arc<Mutex<MemState>>,
    clock: Arc<dyn Clock>,
    staged: Vec<StagedOp>,
    finished: bool,
}

impl std::fmt::Debug for MemTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTx")
            .field("id", &self.id)
            .field("staged", &self.staged.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl MemTx {
    /// Records a domain side effect that becomes visible in
    /// [`InMemoryMessageStore::side_effects`] only if this transaction commits.
    pub fn record_side_effect(&mut self, effect: impl Into<String>) {
        self.staged.push(StagedOp::SideEffect(effect.into()));
    }

    fn finish(&mut self) {
        self.finished = true;
        self.staged.clear();
        self.state.lock().unwrap().release(self.id);
    }
}

#[async_trait]
impl Transaction for MemTx {
    async fn commit(mut self) -> Result<(), ConnectorError> {
        let now = self.clock.now();
        let staged = std::mem::take(&mut self.staged);
        {
            let mut state = self.state.lock().unwrap();
            if state.failing_commits > 0 {
                state.failing_commits -= 1;
                state.rollbacks += 1;
                drop(state);
                self.finish();
                return Err(ConnectorError::Database("commit failed: connection reset".into()));
            }
            for op in staged {
                state.apply(op, now);
            }
            state.commits += 1;
        }
        self.finish();
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), ConnectorError> {
        self.state.lock().unwrap().rollbacks += 1;
        self.finish();
        Ok(())
    }
}

impl Drop for MemTx {
    fn drop(&mut self) {
        if !self.finished {
            if let Ok(mut state) = self.state.lock() {
                state.rollbacks += 1;
                state.release(self.id);
            }
        }
    }
}

/// Message store keeping both tables in memory.
///
/// Clones share the same tables.
#[derive(Clone)]
pub struct InMemoryMessageStore {
    state: Arc<Mutex<MemState>>,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for InMemoryMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageStore").finish_non_exhaustive()
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    /// Creates an empty store using the system clock and thread RNG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState::default())),
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

    /// Returns a transaction supplier sharing this store's tables.
    #[must_use]
    pub fn supplier(&self) -> InMemoryTxSupplier {
        InMemoryTxSupplier {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Makes the next `n` calls to `begin` fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_begins(&self, n: usize) {
        self.state.lock().unwrap().failing_begins = n;
    }

    /// Makes the next `n` commits fail. Their staged writes are discarded.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_commits(&self, n: usize) {
        self.state.lock().unwrap().failing_commits = n;
    }

    /// Makes the next `n` inbox or outbox selections fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_selects(&self, n: usize) {
        self.state.lock().unwrap().failing_selects = n;
    }

    /// Returns all inbox rows ordered by id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn inbox_rows(&self) -> Vec<InboxRow> {
        self.state.lock().unwrap().inbox.values().cloned().collect()
    }

    /// Returns all outbox rows ordered by id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn outbox_rows(&self) -> Vec<OutboxRow> {
        self.state.lock().unwrap().outbox.values().cloned().collect()
    }

    /// Inbox messages in the order their processed transition committed.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn processed(&self) -> Vec<InboundMessage> {
        self.state.lock().unwrap().processed.clone()
    }

    /// Outbox messages in the order their sent transition committed.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Committed domain side effects in commit order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn side_effects(&self) -> Vec<String> {
        self.state.lock().unwrap().side_effects.clone()
    }

    /// Number of times a lock was granted while another row of the same
    /// segment was already locked.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn segment_overlaps(&self) -> usize {
        self.state.lock().unwrap().segment_overlaps
    }

    /// Highest number of outbox rows locked at the same time.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn max_concurrent_outbox_locks(&self) -> usize {
        self.state.lock().unwrap().max_concurrent_outbox_locks
    }

    /// Returns `(commits, rollbacks)` counted so far. Failed commits count as
    /// rollbacks.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn tx_counts(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.commits, state.rollbacks)
    }

    /// Number of rows currently locked across both tables.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn held_locks(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.inbox_locks.len() + state.outbox_locks.len()
    }

    fn begin_tx(
        state: &Arc<Mutex<MemState>>,
        clock: &Arc<dyn Clock>,
    ) -> Result<MemTx, ConnectorError> {
        let mut guard = state.lock().unwrap();
        if guard.failing_begins > 0 {
            guard.failing_begins -= 1;
            return Err(ConnectorError::Database("begin failed: connection refused".into()));
        }
        guard.next_tx += 1;
        Ok(MemTx {
            id: guard.next_tx,
            state: Arc::clone(state),
            clock: Arc::clone(clock),
            staged: Vec::new(),
            finished: false,
        })
    }
}

#[async_trait]
impl TxSupplier for InMemoryMessageStore {
    type Tx = MemTx;

    async fn begin(&self) -> Result<MemTx, ConnectorError> {
        Self::begin_tx(&self.state, &self.clock)
    }
}

/// Transaction supplier of an [`InMemoryMessageStore`].
#[derive(Clone)]
pub struct InMemoryTxSupplier {
    state: Arc<Mutex<MemState>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryTxSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTxSupplier").finish_non_exhaustive()
    }
}

#[async_trait]
impl TxSupplier for InMemoryTxSupplier {
    type Tx = MemTx;

    async fn begin(&self) -> Result<MemTx, ConnectorError> {
        InMemoryMessageStore::begin_tx(&self.state, &self.clock)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    type Tx = MemTx;

    async fn add_inbox_messages(
        &self,
        tx: &mut MemTx,
        instance: InstanceId,
        messages: &[InboundMessage],
    ) -> Result<(), ConnectorError> {
        if !messages.is_empty() {
            tx.staged.push(StagedOp::AddInbox(instance, messages.to_vec()));
        }
        Ok(())
    }

    async fn next_inbox_message(
        &self,
        tx: &mut MemTx,
        select_random_segment: bool,
    ) -> Result<Option<InboundMessage>, ConnectorError> {
        let mut state = self.state.lock().unwrap();
        state.take_select_failure()?;

        let mut heads: BTreeMap<(String, i32, String), &InboxRow> = BTreeMap::new();
        for row in state.inbox.values().filter(|row| !row.status.is_terminal()) {
            let segment = (
                row.message.topic.clone(),
                row.message.partition,
                row.message.key.clone(),
            );
            heads
                .entry(segment)
                .and_modify(|head| {
                    if row.message.offset < head.message.offset {
                        *head = row;
                    }
                })
                .or_insert(row);
        }
        let mut candidates: Vec<&InboxRow> = heads.into_values().collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        if select_random_segment {
            let pick = self.rng.next_index(candidates.len()).min(candidates.len() - 1);
            candidates = vec![candidates[pick]];
        }
        let chosen = candidates
            .into_iter()
            .filter(|row| row.status == InboxMessageStatus::Pending)
            .filter(|row| {
                state
                    .inbox_locks
                    .get(&row.message.id)
                    .is_none_or(|holder| *holder == tx.id)
            })
            .min_by_key(|row| (row.status_ts, row.message.id))
            .map(|row| row.message.clone());

        let Some(message) = chosen else {
            return Ok(None);
        };
        let segment = state.inbox_segment(message.id);
        let overlapping = state
            .inbox_locks
            .keys()
            .filter(|locked| **locked != message.id)
            .any(|locked| state.inbox_segment(*locked) == segment);
        if overlapping {
            state.segment_overlaps += 1;
        }
        state.inbox_locks.insert(message.id, tx.id);
        Ok(Some(message))
    }

    async fn set_inbox_message_status(
        &self,
        tx: &mut MemTx,
        instance: InstanceId,
        id: i64,
        status: InboxMessageStatus,
    ) -> Result<(), ConnectorError> {
        let state = self.state.lock().unwrap();
        match state.inbox.get(&id) {
            Some(row) if !row.status.is_terminal() => {
                tx.staged.push(StagedOp::SetInboxStatus(instance, id, status));
                Ok(())
            }
            _ => Err(ConnectorError::NotFound(format!("inbox message {id}"))),
        }
    }

    async fn touch_inbox_message(
        &self,
        tx: &mut MemTx,
        instance: InstanceId,
        id: i64,
    ) -> Result<(), ConnectorError> {
        let state = self.state.lock().unwrap();
        match state.inbox.get(&id) {
            Some(row) if !row.status.is_terminal() => {
                tx.staged.push(StagedOp::TouchInbox(instance, id));
                Ok(())
            }
            _ => Err(ConnectorError::NotFound(format!("inbox message {id}"))),
        }
    }

    async fn add_outbox_messages(
        &self,
        tx: &mut MemTx,
        instance: InstanceId,
        messages: &[OutboundMessage],
    ) -> Result<(), ConnectorError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            let mut message = message.clone();
            message.value = OutboundValue::Raw(message.value.to_bytes()?);
            stored.push(message);
        }
        tx.staged.push(StagedOp::AddOutbox(instance, stored));
        Ok(())
    }

    async fn next_outbox_message(
        &self,
        tx: &mut MemTx,
    ) -> Result<Option<OutboundMessage>, ConnectorError> {
        let mut state = self.state.lock().unwrap();
        state.take_select_failure()?;

        let mut heads: BTreeMap<(String, String), i64> = BTreeMap::new();
        for row in state.outbox.values().filter(|row| !row.status.is_terminal()) {
            heads
                .entry((row.message.topic.clone(), row.message.key.clone()))
                .or_insert(row.message.id);
        }
        let chosen = heads
            .into_values()
            .filter(|id| {
                state
                    .outbox_locks
                    .get(id)
                    .is_none_or(|holder| *holder == tx.id)
            })
            .min();

        let Some(id) = chosen else {
            return Ok(None);
        };
        let segment = state.outbox_segment(id);
        let overlapping = state
            .outbox_locks
            .keys()
            .filter(|locked| **locked != id)
            .any(|locked| state.outbox_segment(*locked) == segment);
        if overlapping {
            state.segment_overlaps += 1;
        }
        state.outbox_locks.insert(id, tx.id);
        state.max_concurrent_outbox_locks = state
            .max_concurrent_outbox_locks
            .max(state.outbox_locks.len());
        Ok(state.outbox.get(&id).map(|row| row.message.clone()))
    }

    async fn set_outbox_message_status(
        &self,
        tx: &mut MemTx,
        instance: InstanceId,
        id: i64,
        status: OutboxMessageStatus,
    ) -> Result<(), ConnectorError> {
        let state = self.state.lock().unwrap();
        if !state.outbox.contains_key(&id) {
            return Err(ConnectorError::NotFound(format!("outbox message {id}")));
        }
        tx.staged.push(StagedOp::SetOutboxStatus(instance, id, status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mds_core::codec::{BrokerRecord, decode};

    use crate::{FixedClock, SequenceRng};

    fn inbound(topic: &str, partition: i32, offset: i64, key: &str) -> InboundMessage {
        let mut record = BrokerRecord::outgoing(topic, key.as_bytes(), b"{}".to_vec());
        record.partition = partition;
        record.offset = offset;
        decode(&record)
    }

    async fn seed(store: &InMemoryMessageStore, messages: &[InboundMessage]) {
        let mut tx = store.begin().await.unwrap();
        store
            .add_inbox_messages(&mut tx, InstanceId::current(), messages)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_inbox_offsets_are_ignored() {
        // Arrange
        let store = InMemoryMessageStore::new();
        let message = inbound("T", 0, 42, "k");

        // Act
        seed(&store, &[message.clone(), message.clone()]).await;
        seed(&store, &[message]).await;

        // Assert
        assert_eq!(store.inbox_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_rolled_back_writes_are_discarded() {
        let store = InMemoryMessageStore::new();

        let mut tx = store.begin().await.unwrap();
        store
            .add_inbox_messages(&mut tx, InstanceId::current(), &[inbound("T", 0, 1, "k")])
            .await
            .unwrap();
        tx.record_side_effect("created");
        tx.rollback().await.unwrap();

        assert!(store.inbox_rows().is_empty());
        assert!(store.side_effects().is_empty());
    }

    #[tokio::test]
    async fn test_locked_segment_head_is_skipped_by_peers() {
        // Arrange
        let store = InMemoryMessageStore::new();
        seed(
            &store,
            &[inbound("T", 0, 1, "a"), inbound("T", 0, 2, "a"), inbound("T", 0, 3, "b")],
        )
        .await;

        // Act
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut third = store.begin().await.unwrap();
        let a = store.next_inbox_message(&mut first, false).await.unwrap().unwrap();
        let b = store.next_inbox_message(&mut second, false).await.unwrap().unwrap();
        let none = store.next_inbox_message(&mut third, false).await.unwrap();

        // Assert
        assert_eq!((a.key.as_str(), a.offset), ("a", 1));
        assert_eq!((b.key.as_str(), b.offset), ("b", 3));
        assert!(none.is_none());
        assert_eq!(store.segment_overlaps(), 0);

        drop(first);
        assert_eq!(store.held_locks(), 1);
    }

    #[tokio::test]
    async fn test_touched_row_ages_behind_other_segments() {
        // Arrange
        let t0 = Utc::now();
        let store = InMemoryMessageStore::new().with_clock(FixedClock(t0));
        seed(&store, &[inbound("T", 0, 1, "a")]).await;
        let later = store.clone().with_clock(FixedClock(t0 + Duration::seconds(5)));
        seed(&later, &[inbound("T", 0, 2, "b")]).await;
        let touched = store.clone().with_clock(FixedClock(t0 + Duration::seconds(10)));

        // Act
        let mut tx = touched.begin().await.unwrap();
        let first = touched.next_inbox_message(&mut tx, false).await.unwrap().unwrap();
        touched
            .touch_inbox_message(&mut tx, InstanceId::current(), first.id)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        let mut tx = touched.begin().await.unwrap();
        let next = touched.next_inbox_message(&mut tx, false).await.unwrap().unwrap();

        // Assert
        assert_eq!(first.key, "a");
        assert_eq!(next.key, "b");
    }

    #[tokio::test]
    async fn test_random_selection_uses_rng() {
        let store = InMemoryMessageStore::new().with_rng(SequenceRng::new(vec![1]));
        seed(&store, &[inbound("T", 0, 1, "a"), inbound("T", 0, 2, "b")]).await;

        let mut tx = store.begin().await.unwrap();
        let picked = store.next_inbox_message(&mut tx, true).await.unwrap().unwrap();

        assert_eq!(picked.key, "b");
    }

    #[tokio::test]
    async fn test_processed_row_rejects_second_transition() {
        let store = InMemoryMessageStore::new();
        seed(&store, &[inbound("T", 0, 1, "a")]).await;
        let mut tx = store.begin().await.unwrap();
        let message = store.next_inbox_message(&mut tx, false).await.unwrap().unwrap();
        store
            .set_inbox_message_status(
                &mut tx,
                InstanceId::current(),
                message.id,
                InboxMessageStatus::Processed,
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = store
            .set_inbox_message_status(
                &mut tx,
                InstanceId::current(),
                message.id,
                InboxMessageStatus::Processed,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::NotFound(_)));
        assert_eq!(store.processed().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_discards_and_releases() {
        let store = InMemoryMessageStore::new();
        seed(&store, &[inbound("T", 0, 1, "a")]).await;
        store.fail_next_commits(1);

        let mut tx = store.begin().await.unwrap();
        let message = store.next_inbox_message(&mut tx, false).await.unwrap().unwrap();
        store
            .set_inbox_message_status(
                &mut tx,
                InstanceId::current(),
                message.id,
                InboxMessageStatus::Processed,
            )
            .await
            .unwrap();
        let result = tx.commit().await;

        assert!(result.is_err());
        assert!(store.processed().is_empty());
        assert_eq!(store.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_outbox_next_returns_segment_heads_in_id_order() {
        // Arrange
        let store = InMemoryMessageStore::new();
        let mut tx = store.begin().await.unwrap();
        let messages = [
            OutboundMessage::raw("U", "x", "ack", b"1".to_vec()),
            OutboundMessage::raw("U", "x", "ack", b"2".to_vec()),
            OutboundMessage::raw("U", "y", "ack", b"3".to_vec()),
        ];
        store
            .add_outbox_messages(&mut tx, InstanceId::current(), &messages)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        // Act
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let a = store.next_outbox_message(&mut first).await.unwrap().unwrap();
        let b = store.next_outbox_message(&mut second).await.unwrap().unwrap();

        // Assert
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 3);
        assert_eq!(store.max_concurrent_outbox_locks(), 2);
    }
}
