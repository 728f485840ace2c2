//! Database transaction seam.
//!
//! The connector never talks to a driver directly. It asks a [`TxSupplier`]
//! for short transactions and finishes each of them itself.

use async_trait::async_trait;

use crate::error::ConnectorError;

/// A database transaction. Dropping it without finishing rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Database` if the commit fails.
    async fn commit(self) -> Result<(), ConnectorError>;

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Database` if the rollback fails.
    async fn rollback(self) -> Result<(), ConnectorError>;
}

/// Grants transactions to the connector loops.
#[async_trait]
pub trait TxSupplier: Send + Sync {
    /// The transaction type handed out.
    type Tx: Transaction;

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Database` if no transaction can be started.
    async fn begin(&self) -> Result<Self::Tx, ConnectorError>;
}
