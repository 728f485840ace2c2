//! Scoped schema migrations.
//!
//! Several migration scopes share one log table, so the connector tables and
//! the hosting service's domain tables migrate independently within the same
//! database. Each migration runs in its own transaction and every attempt,
//! failed ones included, is written to the log.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{info, instrument};

use mds_core::error::ConnectorError;

use crate::schema::{DEFAULT_MIGRATION_LOG_TABLE, MIGRATION_SCOPE, migrations};

/// Version reported for a scope without any successful migration.
pub const ZERO_VERSION: i32 = -1;

/// A single schema migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Human-readable name, written to the log.
    pub name: String,
    /// Version the schema has after this migration.
    pub target_version: i32,
    /// Statements to execute.
    pub sql: String,
}

impl Migration {
    /// Creates a new migration.
    pub fn new(name: impl Into<String>, target_version: i32, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_version,
            sql: sql.into(),
        }
    }
}

/// Errors raised while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two migrations target the same version.
    #[error("duplicate target version {target_version} (migration {name:?})")]
    DuplicateTargetVersion {
        /// Name of the second migration with that version.
        name: String,
        /// The duplicated version.
        target_version: i32,
    },

    /// The log table name would need quoting.
    #[error("no quotes allowed in migration log table name: {0}")]
    InvalidLogTable(String),

    /// A migration statement failed. The attempt was logged.
    #[error("migration {name:?} to version {target_version} failed: {source}")]
    Failed {
        /// Name of the failed migration.
        name: String,
        /// Version it attempted to reach.
        target_version: i32,
        /// The database error.
        #[source]
        source: sqlx::Error,
    },

    /// The log table could not be read or written.
    #[error("migration log: {0}")]
    Log(#[from] sqlx::Error),
}

impl From<MigrationError> for ConnectorError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::DuplicateTargetVersion { .. } | MigrationError::InvalidLogTable(_) => {
                ConnectorError::internal(err.to_string())
            }
            MigrationError::Failed { .. } | MigrationError::Log(_) => {
                ConnectorError::Database(err.to_string())
            }
        }
    }
}

/// Applies the migrations of one scope.
#[derive(Debug, Clone)]
pub struct ScopedMigrator {
    migrations: Vec<Migration>,
    log_table: String,
    scope: String,
}

impl ScopedMigrator {
    /// Creates a migrator.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateTargetVersion` if two migrations share
    /// a target version and `MigrationError::InvalidLogTable` if the log table
    /// name contains quotes.
    pub fn new(
        migrations: Vec<Migration>,
        log_table: impl Into<String>,
        scope: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        let log_table = log_table.into();
        if log_table.contains('\'') || log_table.contains('"') {
            return Err(MigrationError::InvalidLogTable(log_table));
        }
        let mut seen = HashSet::new();
        for migration in &migrations {
            if !seen.insert(migration.target_version) {
                return Err(MigrationError::DuplicateTargetVersion {
                    name: migration.name.clone(),
                    target_version: migration.target_version,
                });
            }
        }
        Ok(Self {
            migrations,
            log_table,
            scope: scope.into(),
        })
    }

    /// Migrations with a target version above `current`, ascending.
    #[must_use]
    pub fn pending(&self, current: i32) -> Vec<&Migration> {
        let mut pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.target_version > current)
            .collect();
        pending.sort_by_key(|m| m.target_version);
        pending
    }

    /// Highest successfully migrated version of this scope.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Log` if the log table cannot be read.
    pub async fn current_version(&self, conn: &mut PgConnection) -> Result<i32, MigrationError> {
        let version = sqlx::query_scalar::<_, i32>(&format!(
            "SELECT COALESCE(MAX(target_version), {ZERO_VERSION}) FROM {} \
             WHERE scope = $1 AND success",
            self.log_table
        ))
        .bind(&self.scope)
        .fetch_one(conn)
        .await?;
        Ok(version)
    }

    /// Creates the log table if needed and applies all pending migrations.
    /// Returns the resulting schema version.
    ///
    /// Replicas starting at the same time serialise on an advisory lock keyed
    /// by the scope; a migration applied by a peer meanwhile is skipped.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Failed` for the first failing migration and
    /// `MigrationError::Log` for log table failures.
    #[instrument(skip(self, pool), fields(scope = %self.scope, log_table = %self.log_table))]
    pub async fn up(&self, pool: &PgPool) -> Result<i32, MigrationError> {
        let mut tx = pool.begin().await?;
        self.lock(&mut tx).await?;
        sqlx::raw_sql(&self.log_table_ddl()).execute(&mut *tx).await?;
        let mut current = self.current_version(&mut tx).await?;
        tx.commit().await?;

        let pending = self.pending(current);
        if pending.is_empty() {
            info!(current_version = current, "database schema up-to-date");
            return Ok(current);
        }

        for (i, migration) in pending.iter().enumerate() {
            let mut tx = pool.begin().await?;
            self.lock(&mut tx).await?;
            current = self.current_version(&mut tx).await?;
            if migration.target_version <= current {
                tx.commit().await?;
                continue;
            }
            info!(
                name = %migration.name,
                target_version = migration.target_version,
                "running database migration {}/{}",
                i + 1,
                pending.len()
            );
            if let Err(source) = sqlx::raw_sql(&migration.sql).execute(&mut *tx).await {
                tx.rollback().await?;
                let mut conn = pool.acquire().await?;
                self.log_attempt(&mut conn, migration, Some(&source.to_string()))
                    .await?;
                return Err(MigrationError::Failed {
                    name: migration.name.clone(),
                    target_version: migration.target_version,
                    source,
                });
            }
            self.log_attempt(&mut tx, migration, None).await?;
            tx.commit().await?;
            current = migration.target_version;
        }
        Ok(current)
    }

    async fn lock(&self, conn: &mut PgConnection) -> Result<(), MigrationError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&self.scope)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn log_attempt(
        &self,
        conn: &mut PgConnection,
        migration: &Migration,
        err_message: Option<&str>,
    ) -> Result<(), MigrationError> {
        sqlx::query(&format!(
            "INSERT INTO {} (ts, scope, name, target_version, success, err_message) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            self.log_table
        ))
        .bind(Utc::now())
        .bind(&self.scope)
        .bind(&migration.name)
        .bind(migration.target_version)
        .bind(err_message.is_none())
        .bind(err_message)
        .execute(conn)
        .await?;
        Ok(())
    }

    fn log_table_ddl(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}
(
    id             serial
        constraint {}_pk
            primary key,
    ts             timestamptz not null,
    scope          varchar     not null,
    name           varchar     not null,
    target_version int         not null,
    success        boolean     not null,
    err_message    text
);",
            self.log_table, self.log_table
        )
    }
}

/// Creates or upgrades the inbox and outbox tables.
///
/// # Errors
///
/// Returns the migrator's error if a migration cannot be applied.
pub async fn run_migrations(pool: &PgPool) -> Result<i32, MigrationError> {
    ScopedMigrator::new(migrations(), DEFAULT_MIGRATION_LOG_TABLE, MIGRATION_SCOPE)?
        .up(pool)
        .await
}
