#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the smart mining server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the database row types to allow independent evolution of the API
//! contract.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use smart_mining_database_models::SampleRow;

/// Response body of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Always `true` when the server is answering.
    pub healthy: bool,
    /// Server crate version.
    pub version: String,
}

/// A stored drillhole sample as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSample {
    /// Sample id.
    pub id: i64,
    /// Easting.
    pub x_coord: f64,
    /// Northing.
    pub y_coord: f64,
    /// Depth or elevation.
    pub z_coord: f64,
    /// Grade.
    pub teneur: f64,
    /// Insertion time.
    pub created_at: NaiveDateTime,
}

impl From<SampleRow> for ApiSample {
    fn from(row: SampleRow) -> Self {
        Self {
            id: row.id,
            x_coord: row.x_coord,
            y_coord: row.y_coord,
            z_coord: row.z_coord,
            teneur: row.teneur,
            created_at: row.created_at,
        }
    }
}

/// Query parameters for `GET /api/samples`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SamplesQueryParams {
    /// Maximum number of samples (default and cap 1000).
    pub limit: Option<u32>,
}

/// Query parameters for `POST /api/ingest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestQueryParams {
    /// Name reported back in the ingestion result.
    pub filename: Option<String>,
}

/// Body of `POST /api/ingest/local`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalIngestRequest {
    /// Bare file name inside the server's data directory.
    pub filename: String,
}

/// Body of `POST /api/predict`.
///
/// Fields are optional so a missing coordinate is reported by name rather
/// than as a generic deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictRequest {
    /// Easting.
    pub x_coord: Option<f64>,
    /// Northing.
    pub y_coord: Option<f64>,
    /// Depth or elevation.
    pub z_coord: Option<f64>,
}

/// JSON error body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error kind, e.g. `unmappable-columns`.
    pub error: String,
    /// Human-readable description.
    pub message: String,
    /// Names of missing columns or artifacts, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
    /// Offending input field, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    /// An error with just a kind and message.
    #[must_use]
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            missing: None,
            field: None,
        }
    }

    /// Attaches the list of missing names.
    #[must_use]
    pub fn with_missing<I, S>(mut self, missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.missing = Some(missing.into_iter().map(|s| s.to_string()).collect());
        self
    }

    /// Attaches the offending field name.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}
