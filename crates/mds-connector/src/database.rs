//! Database bootstrap for services hosting the connector.

use mds_core::error::ConnectorError;
use mds_message_store::{PgTxSupplier, run_migrations};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Pool size used by [`connect`].
pub const MAX_CONNECTIONS: u32 = 10;

/// Connects to `PostgreSQL` and brings the inbox and outbox tables up to date.
///
/// # Errors
///
/// Returns `ConnectorError::Database` if the database is unreachable or a
/// migration fails.
pub async fn connect(conn_string: &str) -> Result<PgTxSupplier, ConnectorError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(conn_string)
        .await
        .map_err(|err| ConnectorError::Database(format!("connect: {err}")))?;
    let schema_version = run_migrations(&pool).await?;
    info!(schema_version, "message store ready");
    Ok(PgTxSupplier::new(pool))
}
