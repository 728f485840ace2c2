//! Frozen time for status timestamp assertions.

use chrono::{DateTime, Utc};
use mds_core::clock::Clock;

/// Stamps every `status_ts` and `created` with the same instant, so message
/// selection falls back to row id order.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
