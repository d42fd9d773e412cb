#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Grade prediction from pretrained artifacts.
//!
//! Four JSON artifacts (polynomial expansion, scaler, PCA, KNN regressor)
//! are loaded once into [`ModelArtifacts`]. [`predict`] runs a coordinate
//! through the resulting [`Pipeline`], or reports exactly which artifacts
//! are keeping it from running.

pub mod artifacts;
pub mod stages;

pub use artifacts::{DEFAULT_ARTIFACT_DIR, ModelArtifacts, Pipeline, PipelineUnavailable};
pub use stages::Stage;

use smart_mining_predict_models::PredictionResult;
use smart_mining_sample_models::{CanonicalField, Coordinates};

/// Errors returned by [`predict`].
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    /// A coordinate was NaN or infinite.
    #[error("{field} must be a finite number")]
    InvalidInput {
        /// The offending coordinate.
        field: CanonicalField,
    },

    /// One or more artifacts are not loaded.
    #[error(transparent)]
    Unavailable(#[from] PipelineUnavailable),

    /// The pipeline produced NaN or infinity.
    #[error("model produced a non-finite value: {value}")]
    NonFinite {
        /// The value the pipeline returned.
        value: f64,
    },
}

/// Predicts the grade at `(x, y, z)`.
///
/// # Errors
///
/// * [`PredictError::InvalidInput`] if a coordinate is not finite
/// * [`PredictError::Unavailable`] if the pipeline is not fully loaded
/// * [`PredictError::NonFinite`] if the model output is not finite
pub fn predict(
    artifacts: &ModelArtifacts,
    x_coord: f64,
    y_coord: f64,
    z_coord: f64,
) -> Result<PredictionResult, PredictError> {
    let coordinates = Coordinates::new(x_coord, y_coord, z_coord)
        .map_err(|e| PredictError::InvalidInput { field: e.field })?;

    let pipeline = artifacts.pipeline()?;
    let value = pipeline.run(coordinates.to_array());

    if !value.is_finite() {
        log::error!("Pipeline {} produced {value} for {coordinates:?}", pipeline.label());
        return Err(PredictError::NonFinite { value });
    }

    log::debug!("Predicted {value} at {coordinates:?}");

    Ok(PredictionResult {
        predicted_teneur: value,
        model: pipeline.label().to_string(),
    })
}
