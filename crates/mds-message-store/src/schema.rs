//! Inbox/outbox database schema.

use crate::migrate::Migration;

/// Table holding received messages.
pub const INBOX_TABLE: &str = "__message_inbox";

/// Table holding messages staged for sending.
pub const OUTBOX_TABLE: &str = "__message_outbox";

/// Migration-log scope of the connector tables. Kept apart from the hosting
/// service's own scope so both evolve independently.
pub const MIGRATION_SCOPE: &str = "__message_inbox_outbox";

/// Migration log table shared by all scopes of a database.
pub const DEFAULT_MIGRATION_LOG_TABLE: &str = "__db_migration_log";

/// SQL creating both tables and their indexes.
pub const CREATE_INBOX_OUTBOX: &str = include_str!("../db-migrations/1_create_inbox_outbox.up.sql");

/// All migrations of the connector scope.
#[must_use]
pub fn migrations() -> Vec<Migration> {
    vec![Migration::new("create inbox and outbox", 1, CREATE_INBOX_OUTBOX)]
}
