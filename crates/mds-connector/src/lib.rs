//! MDS Connector: moves events between Kafka and a service's `PostgreSQL`
//! database through a transactional inbox and outbox.
//!
//! A hosting service builds a [`Connector`] around a message store, awaits
//! its topics and runs the three loops with [`run_connector`]:
//!
//! - the reader copies broker records into the inbox and commits their offsets,
//! - the processor hands inbox messages to the domain handler, one
//!   transaction per message,
//! - the outbox pump sends messages staged by handlers through
//!   [`Connector::add_outbox`].

pub mod config;
pub mod connector;
pub mod database;
pub mod kafka;
mod processor;
mod pump;
mod reader;
pub mod telemetry;
pub mod topics;
pub mod tx;

pub use config::{BasicConfig, ConfigError, ConnectorConfig, KafkaConfig, RelayConfig};
pub use connector::{Connector, run_connector};
pub use topics::await_topics;
pub use tx::finish_tx;
