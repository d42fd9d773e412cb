//! Loading the four pretrained artifacts and assembling the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use smart_mining_predict_models::{ArtifactKind, ArtifactState, ArtifactStatus};

use crate::stages::{KnnRegressor, Pca, PolynomialFeatures, Stage, StandardScaler};

/// Width of the raw `(x, y, z)` input fed to the first stage.
pub const INPUT_DIM: usize = 3;

/// Directory searched when `ARTIFACT_DIR` is not set.
pub const DEFAULT_ARTIFACT_DIR: &str = "models";

/// The prediction pipeline cannot run because some artifacts are not
/// loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("model pipeline unavailable, missing: {}", join_kinds(.missing))]
pub struct PipelineUnavailable {
    /// Every artifact that is not loaded, in pipeline order.
    pub missing: Vec<ArtifactKind>,
}

fn join_kinds(kinds: &[ArtifactKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// An ordered, immutable chain of stages.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    label: String,
}

impl Pipeline {
    fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        let label = stages
            .iter()
            .map(|stage| stage.label())
            .collect::<Vec<_>>()
            .join("+");
        Self { stages, label }
    }

    /// Human-readable description of the chain, e.g.
    /// `poly(degree=2)+scaler+pca(n=2)+knn(k=5,uniform)`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs `input` through every stage and returns the final scalar.
    ///
    /// # Panics
    ///
    /// If the stage chain does not end in a single value. Chains are
    /// checked when the artifacts are loaded, so this indicates a bug.
    #[must_use]
    pub fn run(&self, input: [f64; INPUT_DIM]) -> f64 {
        let output = self
            .stages
            .iter()
            .fold(input.to_vec(), |values, stage| stage.apply(&values));
        assert_eq!(output.len(), 1, "pipeline must end in a scalar");
        output[0]
    }
}

type LoadOutcome = Result<Box<dyn Stage>, (ArtifactState, String)>;

/// Load results for all four artifacts plus the pipeline built from them.
///
/// Constructed once at startup and shared read-only afterwards. Loading
/// never fails as a whole; each artifact's outcome is recorded in its
/// [`ArtifactStatus`].
#[derive(Debug)]
pub struct ModelArtifacts {
    statuses: Vec<ArtifactStatus>,
    pipeline: Option<Arc<Pipeline>>,
}

impl ModelArtifacts {
    /// Loads every artifact from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        log::info!("Loading model artifacts from {}", dir.display());

        let slots = ArtifactKind::ALL.map(|kind| {
            let path = dir.join(kind.file_name());
            let outcome = load_one(kind, &path);
            (kind, path, outcome)
        });

        Self::assemble(slots)
    }

    /// Builds an instance from already-constructed stages.
    ///
    /// Each stage fills the slot of its [`Stage::kind`]; kinds not provided
    /// are reported as missing.
    #[must_use]
    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        let mut provided: [Option<Box<dyn Stage>>; 4] = [None, None, None, None];
        for stage in stages {
            let slot = ArtifactKind::ALL
                .iter()
                .position(|kind| *kind == stage.kind())
                .map(|i| &mut provided[i]);
            if let Some(slot) = slot {
                *slot = Some(stage);
            }
        }

        let mut provided = provided.into_iter();
        let slots = ArtifactKind::ALL.map(|kind| {
            let outcome = provided.next().flatten().ok_or_else(|| {
                (
                    ArtifactState::MissingFile,
                    format!("no {kind} stage provided"),
                )
            });
            (kind, PathBuf::from(format!("<memory>/{}", kind.file_name())), outcome)
        });

        Self::assemble(slots)
    }

    fn assemble(slots: [(ArtifactKind, PathBuf, LoadOutcome); 4]) -> Self {
        let mut slots = slots;
        check_chain(&mut slots);

        let mut statuses = Vec::with_capacity(slots.len());
        let mut stages = Vec::with_capacity(slots.len());

        for (kind, path, outcome) in slots {
            let path = path.display().to_string();
            match outcome {
                Ok(stage) => {
                    log::info!("Loaded {kind} artifact from {path}: {}", stage.label());
                    statuses.push(ArtifactStatus::ok(kind, path));
                    stages.push(stage);
                }
                Err((state, detail)) => {
                    log::warn!("{kind} artifact unavailable ({state}): {detail}");
                    statuses.push(ArtifactStatus::failed(kind, path, state, detail));
                }
            }
        }

        let pipeline = (stages.len() == ArtifactKind::ALL.len()).then(|| {
            let pipeline = Pipeline::new(stages);
            log::info!("Prediction pipeline ready: {}", pipeline.label());
            Arc::new(pipeline)
        });

        Self { statuses, pipeline }
    }

    /// Load status of every artifact, in pipeline order.
    #[must_use]
    pub fn status(&self) -> &[ArtifactStatus] {
        &self.statuses
    }

    /// The assembled pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineUnavailable`] naming every artifact that is not
    /// loaded.
    pub fn pipeline(&self) -> Result<Arc<Pipeline>, PipelineUnavailable> {
        self.pipeline.clone().ok_or_else(|| PipelineUnavailable {
            missing: self
                .statuses
                .iter()
                .filter(|status| !status.loaded)
                .map(|status| status.name)
                .collect(),
        })
    }
}

fn load_one(kind: ArtifactKind, path: &Path) -> LoadOutcome {
    if !path.exists() {
        return Err((
            ArtifactState::MissingFile,
            format!("file not found: {}", path.display()),
        ));
    }

    let bytes = std::fs::read(path).map_err(|e| {
        (
            ArtifactState::DeserializeError,
            format!("failed to read {}: {e}", path.display()),
        )
    })?;

    parse_stage(kind, &bytes).map_err(|e| (ArtifactState::DeserializeError, e.to_string()))
}

fn parse_stage(kind: ArtifactKind, bytes: &[u8]) -> Result<Box<dyn Stage>, serde_json::Error> {
    let stage: Box<dyn Stage> = match kind {
        ArtifactKind::Poly => Box::new(serde_json::from_slice::<PolynomialFeatures>(bytes)?),
        ArtifactKind::Scaler => Box::new(serde_json::from_slice::<StandardScaler>(bytes)?),
        ArtifactKind::Pca => Box::new(serde_json::from_slice::<Pca>(bytes)?),
        ArtifactKind::Knn => Box::new(serde_json::from_slice::<KnnRegressor>(bytes)?),
    };
    Ok(stage)
}

/// Marks the first loaded stage whose input width disagrees with what the
/// previous loaded stage produces. A stage after an unloaded one cannot be
/// checked and is left alone.
fn check_chain(slots: &mut [(ArtifactKind, PathBuf, LoadOutcome)]) {
    let mut upstream = Some(("coordinates".to_string(), INPUT_DIM));

    for (kind, _, outcome) in slots.iter_mut() {
        let Ok(stage) = outcome else {
            upstream = None;
            continue;
        };
        let (input, output) = (stage.input_dim(), stage.output_dim());

        if let Some((producer, width)) = &upstream
            && input != *width
        {
            *outcome = Err((
                ArtifactState::IncompatibleArtifact,
                format!("{kind} expects {input} inputs but {producer} produces {width}"),
            ));
            return;
        }

        upstream = Some((kind.to_string(), output));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn artifact_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("smart_mining_artifacts_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(dir: &Path, kind: ArtifactKind, value: &serde_json::Value) {
        std::fs::write(dir.join(kind.file_name()), value.to_string()).unwrap();
    }

    fn write_valid_set(dir: &Path) {
        write(
            dir,
            ArtifactKind::Poly,
            &json!({ "n_features_in": 3, "degree": 1, "include_bias": false }),
        );
        write(
            dir,
            ArtifactKind::Scaler,
            &json!({ "mean": [0.0, 30.0, 100.0], "scale": [1.0, 5.0, 50.0] }),
        );
        write(
            dir,
            ArtifactKind::Pca,
            &json!({
                "mean": [0.0, 0.0, 0.0],
                "components": [[1.0, 0.0, 0.0], [0.0, 0.6, 0.8]],
            }),
        );
        write(
            dir,
            ArtifactKind::Knn,
            &json!({
                "n_neighbors": 2,
                "fit_x": [[-6.5, 0.8], [-6.6, 1.0], [0.0, 0.0]],
                "fit_y": [1.5, 2.5, 9.0],
            }),
        );
    }

    #[test]
    fn loads_a_complete_set() {
        let dir = artifact_dir("complete");
        write_valid_set(&dir);

        let artifacts = ModelArtifacts::load(&dir);
        assert!(artifacts.status().iter().all(|s| s.loaded));

        let pipeline = artifacts.pipeline().unwrap();
        assert_eq!(pipeline.label(), "poly(degree=1)+scaler+pca(n=2)+knn(k=2,uniform)");
        assert!((pipeline.run([-6.55, 33.42, 150.0]) - 2.0).abs() < 1e-9);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_directory_reports_every_file_missing() {
        let dir = artifact_dir("empty");

        let artifacts = ModelArtifacts::load(&dir);
        let states: Vec<ArtifactState> = artifacts.status().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![ArtifactState::MissingFile; 4]);
        assert!(artifacts.status().iter().all(|s| !s.present));

        let err = artifacts.pipeline().unwrap_err();
        assert_eq!(err.missing, ArtifactKind::ALL.to_vec());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_artifact_is_named_exactly() {
        let dir = artifact_dir("corrupt");
        write_valid_set(&dir);
        std::fs::write(dir.join("scaler.json"), b"{ not json").unwrap();

        let artifacts = ModelArtifacts::load(&dir);
        let scaler = &artifacts.status()[1];
        assert_eq!(scaler.name, ArtifactKind::Scaler);
        assert!(scaler.present);
        assert!(!scaler.loaded);
        assert_eq!(scaler.state, ArtifactState::DeserializeError);
        assert!(scaler.error_detail.is_some());

        let err = artifacts.pipeline().unwrap_err();
        assert_eq!(err.missing, vec![ArtifactKind::Scaler]);
        assert_eq!(err.to_string(), "model pipeline unavailable, missing: scaler");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn inconsistent_artifact_is_a_deserialize_error() {
        let dir = artifact_dir("inconsistent");
        write_valid_set(&dir);
        write(
            &dir,
            ArtifactKind::Knn,
            &json!({ "n_neighbors": 5, "fit_x": [[0.0, 0.0]], "fit_y": [1.0] }),
        );

        let artifacts = ModelArtifacts::load(&dir);
        assert_eq!(artifacts.status()[3].state, ArtifactState::DeserializeError);
        assert!(
            artifacts.status()[3]
                .error_detail
                .as_deref()
                .unwrap()
                .contains("n_neighbors")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn dimension_mismatch_marks_downstream_artifact() {
        let dir = artifact_dir("mismatch");
        write_valid_set(&dir);
        // degree 2 without bias on 3 inputs yields 9 features, scaler takes 3
        write(
            &dir,
            ArtifactKind::Poly,
            &json!({ "n_features_in": 3, "degree": 2, "include_bias": false }),
        );

        let artifacts = ModelArtifacts::load(&dir);
        let scaler = &artifacts.status()[1];
        assert_eq!(scaler.state, ArtifactState::IncompatibleArtifact);
        assert!(scaler.present);
        assert_eq!(
            scaler.error_detail.as_deref(),
            Some("scaler expects 3 inputs but poly produces 9")
        );
        assert!(artifacts.status()[0].loaded);
        assert_eq!(
            artifacts.pipeline().unwrap_err().missing,
            vec![ArtifactKind::Scaler]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn first_stage_must_accept_coordinates() {
        let dir = artifact_dir("wrong_input");
        write_valid_set(&dir);
        write(
            &dir,
            ArtifactKind::Poly,
            &json!({ "n_features_in": 2, "degree": 1 }),
        );

        let artifacts = ModelArtifacts::load(&dir);
        assert_eq!(
            artifacts.status()[0].state,
            ArtifactState::IncompatibleArtifact
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn status_is_stable_across_calls() {
        let dir = artifact_dir("stable");
        write_valid_set(&dir);
        std::fs::remove_file(dir.join("pca.json")).unwrap();

        let artifacts = ModelArtifacts::load(&dir);
        let first = serde_json::to_string(artifacts.status()).unwrap();
        let second = serde_json::to_string(artifacts.status()).unwrap();
        assert_eq!(first, second);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn from_stages_reports_unprovided_kinds() {
        let poly: PolynomialFeatures =
            serde_json::from_value(json!({ "n_features_in": 3, "degree": 1 })).unwrap();
        let artifacts = ModelArtifacts::from_stages(vec![Box::new(poly)]);

        assert!(artifacts.status()[0].loaded);
        assert_eq!(
            artifacts.pipeline().unwrap_err().missing,
            vec![ArtifactKind::Scaler, ArtifactKind::Pca, ArtifactKind::Knn]
        );
    }
}
