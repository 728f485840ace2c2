//! `sqlx` adapters for the connector's transaction seam.

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use mds_core::error::ConnectorError;
use mds_core::tx::{Transaction, TxSupplier};
use sqlx::{PgConnection, PgPool, Postgres};

/// A `PostgreSQL` transaction.
///
/// Dereferences to [`PgConnection`], so domain handlers run their own queries
/// on it with `&mut **tx`. Dropping it without commit rolls it back.
pub struct PgTx(sqlx::Transaction<'static, Postgres>);

impl std::fmt::Debug for PgTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PgTx")
    }
}

impl PgTx {
    /// Wraps an already started transaction.
    #[must_use]
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self(tx)
    }
}

impl Deref for PgTx {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.0
    }
}

impl DerefMut for PgTx {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.0
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self) -> Result<(), ConnectorError> {
        self.0
            .commit()
            .await
            .map_err(|e| ConnectorError::Database(format!("commit tx: {e}")))
    }

    async fn rollback(self) -> Result<(), ConnectorError> {
        self.0
            .rollback()
            .await
            .map_err(|e| ConnectorError::Database(format!("rollback tx: {e}")))
    }
}

/// Hands out transactions from a connection pool.
#[derive(Debug, Clone)]
pub struct PgTxSupplier {
    pool: PgPool,
}

impl PgTxSupplier {
    /// Creates a new `PgTxSupplier`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TxSupplier for PgTxSupplier {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, ConnectorError> {
        self.pool
            .begin()
            .await
            .map(PgTx)
            .map_err(|e| ConnectorError::Database(format!("begin tx: {e}")))
    }
}
