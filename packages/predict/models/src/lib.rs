#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Artifact status and prediction result types.
//!
//! These are the shapes reported by `GET /api/model/status` and
//! `POST /api/predict`.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// One of the four pretrained pipeline stages, in pipeline order.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactKind {
    /// Polynomial feature expansion.
    Poly,
    /// Standardization.
    Scaler,
    /// Principal component projection.
    Pca,
    /// K-nearest-neighbor regression.
    Knn,
}

impl ArtifactKind {
    /// Every kind, in the order the pipeline applies them.
    pub const ALL: [Self; 4] = [Self::Poly, Self::Scaler, Self::Pca, Self::Knn];

    /// File name of the artifact inside the artifact directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Poly => "poly.json",
            Self::Scaler => "scaler.json",
            Self::Pca => "pca.json",
            Self::Knn => "knn.json",
        }
    }
}

/// Outcome of loading one artifact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ArtifactState {
    /// Loaded and consistent with its neighbors.
    Ok,
    /// No file at the expected path.
    MissingFile,
    /// The file exists but could not be read, parsed, or validated.
    DeserializeError,
    /// Loaded on its own, but its dimensions do not fit the previous stage.
    IncompatibleArtifact,
}

/// Load status of one artifact.
///
/// Built only through [`ArtifactStatus::ok`] and [`ArtifactStatus::failed`],
/// which keep `loaded`, `state`, and `error_detail` consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatus {
    /// Which artifact this is.
    pub name: ArtifactKind,
    /// Whether a file exists at `path`.
    pub present: bool,
    /// Whether the artifact is usable by the pipeline.
    pub loaded: bool,
    /// Why the artifact is not usable; `None` iff `loaded`.
    pub error_detail: Option<String>,
    /// Machine-readable outcome.
    pub state: ArtifactState,
    /// Resolved file path.
    pub path: String,
}

impl ArtifactStatus {
    /// Status of a successfully loaded artifact.
    #[must_use]
    pub fn ok(name: ArtifactKind, path: impl Into<String>) -> Self {
        Self {
            name,
            present: true,
            loaded: true,
            error_detail: None,
            state: ArtifactState::Ok,
            path: path.into(),
        }
    }

    /// Status of an artifact that cannot be used.
    ///
    /// `present` is derived from `state`: only [`ArtifactState::MissingFile`]
    /// means there is no file.
    #[must_use]
    pub fn failed(
        name: ArtifactKind,
        path: impl Into<String>,
        state: ArtifactState,
        detail: impl Into<String>,
    ) -> Self {
        debug_assert!(state != ArtifactState::Ok);
        Self {
            name,
            present: state != ArtifactState::MissingFile,
            loaded: false,
            error_detail: Some(detail.into()),
            state,
            path: path.into(),
        }
    }
}

/// A successful grade prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted grade at the requested coordinates.
    pub predicted_teneur: f64,
    /// Label of the pipeline that produced the value.
    pub model: String,
}
