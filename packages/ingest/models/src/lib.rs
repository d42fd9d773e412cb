#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion options, drop reasons, and result types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smart_mining_sample_models::CanonicalField;

/// Field separator of a CSV file, chosen from the header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// `\t`
    Tab,
}

impl Delimiter {
    /// Candidates in tie-break priority order.
    pub const CANDIDATES: [Self; 3] = [Self::Comma, Self::Semicolon, Self::Tab];

    /// The separator byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Comma => b',',
            Self::Semicolon => b';',
            Self::Tab => b'\t',
        }
    }
}

/// Knobs for a single ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Decimal separator used by numeric cells. Anything other than `.` is
    /// translated to `.` before parsing.
    pub decimal_separator: char,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
        }
    }
}

/// Why a data row was not inserted.
///
/// Rendered as `missing:<field>`, `non-numeric:<field>`, `malformed-row`,
/// or `duplicate-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DropReason {
    /// A required cell was empty or whitespace.
    Missing(CanonicalField),
    /// A required cell did not parse to a finite number.
    NonNumeric(CanonicalField),
    /// The row's cell count differed from the header's, or the row could
    /// not be decoded.
    MalformedRow,
    /// The row's id was already stored, or appeared earlier in the file.
    DuplicateId,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "missing:{field}"),
            Self::NonNumeric(field) => write!(f, "non-numeric:{field}"),
            Self::MalformedRow => f.write_str("malformed-row"),
            Self::DuplicateId => f.write_str("duplicate-id"),
        }
    }
}

/// Error returned when a string is not a recognized [`DropReason`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown drop reason: {value}")]
pub struct ParseDropReasonError {
    /// The rejected input.
    pub value: String,
}

impl FromStr for DropReason {
    type Err = ParseDropReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDropReasonError {
            value: s.to_string(),
        };

        match s {
            "malformed-row" => return Ok(Self::MalformedRow),
            "duplicate-id" => return Ok(Self::DuplicateId),
            _ => {}
        }

        let (kind, field) = s.split_once(':').ok_or_else(err)?;
        let field: CanonicalField = field.parse().map_err(|_| err())?;
        match kind {
            "missing" => Ok(Self::Missing(field)),
            "non-numeric" => Ok(Self::NonNumeric(field)),
            _ => Err(err()),
        }
    }
}

impl Serialize for DropReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DropReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Summary of one ingestion call.
///
/// `rows_received == rows_inserted + rows_dropped`, and the per-reason
/// counts in `drop_reasons` sum to `rows_dropped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionResult {
    /// Name of the uploaded or local file.
    pub filename: String,
    /// Data rows read from the file (header excluded).
    pub rows_received: u64,
    /// Rows that passed coercion and were persisted. Rows skipped because
    /// their id already existed are counted under `duplicate-id` instead.
    pub rows_inserted: u64,
    /// Rows that were rejected.
    pub rows_dropped: u64,
    /// Rejected rows grouped by reason.
    pub drop_reasons: BTreeMap<DropReason, u64>,
    /// Separator detected on the header line.
    pub delimiter: Delimiter,
    /// Wall-clock time spent on the call.
    pub duration_ms: u64,
}
