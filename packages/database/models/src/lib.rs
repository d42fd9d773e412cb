#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database row types.
//!
//! These types represent samples as stored in and retrieved from the
//! `forages` table. They are distinct from the API response types in
//! `smart_mining_server_models` and the validated ingestion type
//! [`SampleRecord`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use smart_mining_sample_models::SampleRecord;

/// Upper bound on how many rows a "recent samples" query may return.
pub const MAX_RECENT_LIMIT: u32 = 1000;

/// A drillhole sample row as retrieved from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Primary key (source-provided or generated).
    pub id: i64,
    /// Easting.
    pub x_coord: f64,
    /// Northing.
    pub y_coord: f64,
    /// Depth or elevation.
    pub z_coord: f64,
    /// Grade.
    pub teneur: f64,
    /// When the row was inserted. Defines recency for listings.
    pub created_at: NaiveDateTime,
}

impl SampleRow {
    /// Builds a row from a validated record and the identity storage gave it.
    #[must_use]
    pub const fn from_record(id: i64, record: &SampleRecord, created_at: NaiveDateTime) -> Self {
        Self {
            id,
            x_coord: record.x_coord(),
            y_coord: record.y_coord(),
            z_coord: record.z_coord(),
            teneur: record.teneur(),
            created_at,
        }
    }
}
