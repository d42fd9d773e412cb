#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database connection, sample storage, and migrations for smart mining.
//!
//! Uses `switchy_database` for raw parameterized SQL and `switchy_schema`
//! for embedded SQL migrations. Callers depend on the [`SampleStore`]
//! trait rather than a concrete backend so ingestion can run against the
//! `PostgreSQL` store in production and [`memory::InMemorySampleStore`] in
//! tests and dry runs.

pub mod db;
pub mod memory;
pub mod queries;

use std::sync::Arc;

use async_trait::async_trait;
use include_dir::{Dir, include_dir};
use smart_mining_database_models::SampleRow;
use smart_mining_sample_models::SampleRecord;
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),

    /// Data conversion or constraint error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}

/// Persistence boundary for drillhole samples.
///
/// Implementations own their concurrency discipline; callers may share one
/// store across concurrent requests.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Persists every record as one logical batch and returns how many were
    /// inserted.
    ///
    /// Records whose id is already stored, or repeats an earlier record of
    /// the same batch, are skipped and left out of the returned count. A
    /// failed batch leaves nothing behind: either the batch is committed or
    /// an error is returned and no record is stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the batch could not be committed.
    async fn insert_many(&self, records: &[SampleRecord]) -> Result<u64, DbError>;

    /// Returns up to `limit` samples, most recently inserted first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    async fn list_recent(&self, limit: u32) -> Result<Vec<SampleRow>, DbError>;
}

/// [`SampleStore`] backed by the `forages` table.
#[derive(Clone)]
pub struct PostgresSampleStore {
    db: Arc<dyn Database>,
}

impl PostgresSampleStore {
    /// Wraps an open database connection.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SampleStore for PostgresSampleStore {
    async fn insert_many(&self, records: &[SampleRecord]) -> Result<u64, DbError> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.db.begin_transaction().await?;

        match queries::insert_samples(tx.as_ref(), records).await {
            Ok(inserted) => {
                tx.commit().await?;
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("Failed to roll back sample batch: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SampleRow>, DbError> {
        queries::list_recent_samples(self.db.as_ref(), limit).await
    }
}
