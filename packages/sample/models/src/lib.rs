#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Drillhole sample types shared across the smart-mining workspace.
//!
//! A [`SampleRecord`] (a "forage") is the validated, immutable form of one
//! drillhole observation. Every ingestion path and every prediction input
//! goes through [`SampleRecord::new`] or [`Coordinates::new`], so the
//! finiteness invariant holds for anything downstream of this crate.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// One of the semantic columns a CSV header can resolve to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CanonicalField {
    /// Easting.
    XCoord,
    /// Northing.
    YCoord,
    /// Depth or elevation.
    ZCoord,
    /// Grade value.
    Teneur,
    /// Optional source identifier.
    Id,
}

impl CanonicalField {
    /// The fields every ingested row must carry, in coercion order.
    pub const REQUIRED: [Self; 4] = [Self::XCoord, Self::YCoord, Self::ZCoord, Self::Teneur];

    /// Returns every canonical field, required ones first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::XCoord,
            Self::YCoord,
            Self::ZCoord,
            Self::Teneur,
            Self::Id,
        ]
    }

    /// Whether a file must map this field to be ingestible.
    #[must_use]
    pub const fn is_required(self) -> bool {
        !matches!(self, Self::Id)
    }
}

/// Returned when a sample value is NaN or infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{field} must be a finite number")]
pub struct InvalidSampleError {
    /// The first offending field.
    pub field: CanonicalField,
}

/// A validated `(x, y, z)` position, the input to grade prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    x_coord: f64,
    y_coord: f64,
    z_coord: f64,
}

impl Coordinates {
    /// Validates and builds a coordinate triple.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSampleError`] naming the first non-finite component.
    pub fn new(x_coord: f64, y_coord: f64, z_coord: f64) -> Result<Self, InvalidSampleError> {
        check_finite(CanonicalField::XCoord, x_coord)?;
        check_finite(CanonicalField::YCoord, y_coord)?;
        check_finite(CanonicalField::ZCoord, z_coord)?;
        Ok(Self {
            x_coord,
            y_coord,
            z_coord,
        })
    }

    /// Easting.
    #[must_use]
    pub const fn x_coord(&self) -> f64 {
        self.x_coord
    }

    /// Northing.
    #[must_use]
    pub const fn y_coord(&self) -> f64 {
        self.y_coord
    }

    /// Depth or elevation.
    #[must_use]
    pub const fn z_coord(&self) -> f64 {
        self.z_coord
    }

    /// The triple as a feature vector, in `x, y, z` order.
    #[must_use]
    pub const fn to_array(&self) -> [f64; 3] {
        [self.x_coord, self.y_coord, self.z_coord]
    }
}

/// A single drillhole observation ready for persistence.
///
/// Immutable once built; all four numeric fields are finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleRecord {
    id: Option<i64>,
    #[serde(flatten)]
    coordinates: Coordinates,
    teneur: f64,
}

impl SampleRecord {
    /// Validates and builds a sample. `id` is `None` when storage should
    /// generate one.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSampleError`] naming the first non-finite field.
    pub fn new(
        id: Option<i64>,
        x_coord: f64,
        y_coord: f64,
        z_coord: f64,
        teneur: f64,
    ) -> Result<Self, InvalidSampleError> {
        let coordinates = Coordinates::new(x_coord, y_coord, z_coord)?;
        check_finite(CanonicalField::Teneur, teneur)?;
        Ok(Self {
            id,
            coordinates,
            teneur,
        })
    }

    /// Source identifier, if the file provided a usable one.
    #[must_use]
    pub const fn id(&self) -> Option<i64> {
        self.id
    }

    /// Position of the sample.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    /// Easting.
    #[must_use]
    pub const fn x_coord(&self) -> f64 {
        self.coordinates.x_coord
    }

    /// Northing.
    #[must_use]
    pub const fn y_coord(&self) -> f64 {
        self.coordinates.y_coord
    }

    /// Depth or elevation.
    #[must_use]
    pub const fn z_coord(&self) -> f64 {
        self.coordinates.z_coord
    }

    /// Grade.
    #[must_use]
    pub const fn teneur(&self) -> f64 {
        self.teneur
    }
}

const fn check_finite(field: CanonicalField, value: f64) -> Result<(), InvalidSampleError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(InvalidSampleError { field })
    }
}
