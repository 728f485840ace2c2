//! MDS Core: envelope types, codec and seams of the transactional
//! inbox/outbox connector.
//!
//! This crate defines the message envelopes, the broker record codec and the
//! traits every infrastructure adapter implements. It contains no
//! infrastructure code.

pub mod broker;
pub mod clock;
pub mod codec;
pub mod error;
pub mod handler;
pub mod instance;
pub mod message;
pub mod rng;
pub mod store;
pub mod tx;
