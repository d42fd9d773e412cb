#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Library for ingesting drillhole sample CSV files into a [`SampleStore`].
//!
//! A file goes through four steps: separator detection on the header line,
//! header auto-mapping ([`columns`]), per-row coercion ([`coerce`]), and a
//! single batched insert. Rows that fail coercion are counted by reason
//! rather than aborting the file.

pub mod coerce;
pub mod columns;
pub mod delimiter;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use smart_mining_database::{DbError, SampleStore};
use smart_mining_ingest_models::{DropReason, IngestOptions, IngestionResult};

pub use columns::UnmappableColumns;

/// Errors that abort an entire ingestion call.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The file is empty or its header line has no recognizable separator.
    #[error("Unparseable file: {reason}")]
    UnparseableFile {
        /// What made the file unreadable.
        reason: String,
    },

    /// Required columns could not be found in the header.
    #[error("Unmappable columns: {0}")]
    UnmappableColumns(#[from] UnmappableColumns),

    /// The batch insert failed; nothing from this file was stored.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    /// A local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Whether the caller supplied a bad file (as opposed to an
    /// infrastructure failure).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::UnparseableFile { .. } | Self::UnmappableColumns(_))
    }
}

/// Ingests the raw bytes of one CSV file.
///
/// Every accepted row is persisted in one `insert_many` call, so either the
/// batch is stored or the call fails with [`IngestError::Storage`]. Rows the
/// store skips because their id already exists are counted as
/// [`DropReason::DuplicateId`].
///
/// # Errors
///
/// * [`IngestError::UnparseableFile`] when no separator splits the header
/// * [`IngestError::UnmappableColumns`] when a required field has no column
/// * [`IngestError::Storage`] when the batch insert fails
pub async fn ingest_bytes(
    store: &dyn SampleStore,
    content: &[u8],
    filename: &str,
    options: &IngestOptions,
) -> Result<IngestionResult, IngestError> {
    let start = Instant::now();

    let delimiter = delimiter::detect_delimiter(content)
        .map_err(|reason| IngestError::UnparseableFile { reason })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter.as_byte())
        .has_headers(true)
        .flexible(true)
        .from_reader(delimiter::strip_bom(content));

    let headers = reader
        .headers()
        .map_err(|e| IngestError::UnparseableFile {
            reason: format!("unreadable header line: {e}"),
        })?
        .clone();
    let header_len = headers.len();

    let mapping = columns::map_columns(headers.iter())?;
    log::debug!("{filename}: {delimiter:?}-separated, columns {mapping:?}");

    let mut rows_received: u64 = 0;
    let mut drop_reasons: BTreeMap<DropReason, u64> = BTreeMap::new();
    let mut accepted = Vec::new();

    for (row_idx, row) in reader.records().enumerate() {
        rows_received += 1;

        let outcome = match row {
            Ok(record) if record.len() == header_len => {
                coerce::coerce_row(&record, &mapping, options)
            }
            Ok(record) => {
                log::trace!(
                    "{filename}: row {} has {} cells, expected {header_len}",
                    row_idx + 1,
                    record.len()
                );
                Err(DropReason::MalformedRow)
            }
            Err(e) => {
                log::trace!("{filename}: row {} unreadable: {e}", row_idx + 1);
                Err(DropReason::MalformedRow)
            }
        };

        match outcome {
            Ok(sample) => accepted.push(sample),
            Err(reason) => *drop_reasons.entry(reason).or_default() += 1,
        }
    }

    let accepted_len = accepted.len() as u64;
    let rows_inserted = if accepted.is_empty() {
        0
    } else {
        let stored = store.insert_many(&accepted).await.map_err(|e| {
            log::error!("{filename}: failed to store {accepted_len} samples: {e}");
            IngestError::Storage(e)
        })?;
        if stored > accepted_len {
            log::warn!("{filename}: store reported {stored} rows for a batch of {accepted_len}");
        }
        stored.min(accepted_len)
    };

    let duplicates = accepted_len - rows_inserted;
    if duplicates > 0 {
        drop_reasons.insert(DropReason::DuplicateId, duplicates);
    }

    let rows_dropped: u64 = drop_reasons.values().sum();
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    log::info!(
        "{filename}: {rows_received} rows received, {rows_inserted} inserted, {rows_dropped} dropped in {duration_ms}ms"
    );
    for (reason, count) in &drop_reasons {
        log::debug!("{filename}:   {reason}: {count}");
    }

    Ok(IngestionResult {
        filename: filename.to_string(),
        rows_received,
        rows_inserted,
        rows_dropped,
        drop_reasons,
        delimiter,
        duration_ms,
    })
}

/// Ingests a CSV file from disk, reporting it under its file name.
///
/// # Errors
///
/// Returns [`IngestError::Io`] if the file cannot be read, otherwise the
/// same errors as [`ingest_bytes`].
pub async fn ingest_path(
    store: &dyn SampleStore,
    path: &Path,
    options: &IngestOptions,
) -> Result<IngestionResult, IngestError> {
    let content = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());

    ingest_bytes(store, &content, &filename, options).await
}
