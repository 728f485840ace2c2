//! Shared test doubles for the MDS inbox/outbox connector.

mod broker;
mod clock;
mod outbox;
mod rng;
mod store;

pub use broker::{RecordingWriter, ScriptedReader, StubTopicMetadata};
pub use clock::FixedClock;
pub use outbox::RecordingOutbox;
pub use rng::{FirstIndexRng, SequenceRng};
pub use store::{InMemoryMessageStore, InMemoryTxSupplier, InboxRow, MemTx, OutboxRow};
