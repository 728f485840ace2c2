//! MDS Message Store: `PostgreSQL` inbox/outbox persistence.
//!
//! Provides the `MessageStore` implementation used by the connector loops,
//! the transaction adapters handed to domain handlers, and the scoped
//! migration runner that creates the connector tables.

pub mod migrate;
pub mod pg_message_store;
pub mod pg_tx;
pub mod schema;

pub use migrate::{Migration, MigrationError, ScopedMigrator, run_migrations};
pub use pg_message_store::PgMessageStore;
pub use pg_tx::{PgTx, PgTxSupplier};
