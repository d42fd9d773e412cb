//! The four pretrained transform stages.
//!
//! Each stage is deserialized from its JSON artifact and validated for
//! internal consistency on the way in (`#[serde(try_from = ...)]`), so a
//! constructed stage can always be applied to a vector of
//! [`Stage::input_dim`] values.

use std::fmt;

use serde::Deserialize;
use smart_mining_predict_models::ArtifactKind;

/// An artifact parsed but internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidArtifact(String);

fn invalid(message: impl Into<String>) -> InvalidArtifact {
    InvalidArtifact(message.into())
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// One step of the prediction pipeline.
///
/// Implementations must return exactly [`Stage::output_dim`] values and
/// may panic when handed anything other than [`Stage::input_dim`] values.
pub trait Stage: fmt::Debug + Send + Sync {
    /// Which artifact this stage came from.
    fn kind(&self) -> ArtifactKind;

    /// Short description used in the pipeline's model label.
    fn label(&self) -> String;

    /// Width of the vector this stage accepts.
    fn input_dim(&self) -> usize;

    /// Width of the vector this stage produces.
    fn output_dim(&self) -> usize;

    /// Transforms one input vector.
    fn apply(&self, input: &[f64]) -> Vec<f64>;
}

// ---------------------------------------------------------------------------
// Polynomial features
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PolynomialFeaturesArtifact {
    n_features_in: usize,
    degree: u16,
    #[serde(default = "default_true")]
    include_bias: bool,
    #[serde(default)]
    interaction_only: bool,
    #[serde(default)]
    powers: Option<Vec<Vec<u16>>>,
}

const fn default_true() -> bool {
    true
}

/// Polynomial feature expansion with the same output column order as
/// scikit-learn's `PolynomialFeatures`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PolynomialFeaturesArtifact")]
pub struct PolynomialFeatures {
    n_features_in: usize,
    degree: u16,
    powers: Vec<Vec<u16>>,
}

impl TryFrom<PolynomialFeaturesArtifact> for PolynomialFeatures {
    type Error = InvalidArtifact;

    fn try_from(raw: PolynomialFeaturesArtifact) -> Result<Self, Self::Error> {
        if raw.n_features_in == 0 {
            return Err(invalid("n_features_in must be at least 1"));
        }

        let powers = match raw.powers {
            Some(powers) => {
                if let Some(row) = powers.iter().find(|row| row.len() != raw.n_features_in) {
                    return Err(invalid(format!(
                        "powers rows must have {} entries, found {}",
                        raw.n_features_in,
                        row.len()
                    )));
                }
                powers
            }
            None => generate_powers(
                raw.n_features_in,
                raw.degree,
                raw.include_bias,
                raw.interaction_only,
            ),
        };

        if powers.is_empty() {
            return Err(invalid("polynomial expansion produces no features"));
        }

        Ok(Self {
            n_features_in: raw.n_features_in,
            degree: raw.degree,
            powers,
        })
    }
}

impl PolynomialFeatures {
    /// Exponent matrix: one row per output feature, one column per input.
    #[must_use]
    pub fn powers(&self) -> &[Vec<u16>] {
        &self.powers
    }
}

/// Exponent rows ordered by total degree, then by lexicographic
/// combinations (with replacement unless `interaction_only`).
fn generate_powers(
    n_features: usize,
    degree: u16,
    include_bias: bool,
    interaction_only: bool,
) -> Vec<Vec<u16>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(usize::from(degree));
    let start = u16::from(!include_bias);

    for d in start..=degree {
        push_combinations(
            0,
            usize::from(d),
            n_features,
            !interaction_only,
            &mut current,
            &mut out,
        );
    }

    out
}

fn push_combinations(
    from: usize,
    remaining: usize,
    n_features: usize,
    with_replacement: bool,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<u16>>,
) {
    if remaining == 0 {
        let mut row = vec![0u16; n_features];
        for &feature in current.iter() {
            row[feature] += 1;
        }
        out.push(row);
        return;
    }

    for feature in from..n_features {
        current.push(feature);
        let next = if with_replacement { feature } else { feature + 1 };
        push_combinations(
            next,
            remaining - 1,
            n_features,
            with_replacement,
            current,
            out,
        );
        current.pop();
    }
}

impl Stage for PolynomialFeatures {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Poly
    }

    fn label(&self) -> String {
        format!("poly(degree={})", self.degree)
    }

    fn input_dim(&self) -> usize {
        self.n_features_in
    }

    fn output_dim(&self) -> usize {
        self.powers.len()
    }

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(input.len(), self.n_features_in, "poly input width");
        self.powers
            .iter()
            .map(|row| {
                row.iter()
                    .zip(input)
                    .filter(|(p, _)| **p > 0)
                    .map(|(&p, &x)| x.powi(i32::from(p)))
                    .product()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Standard scaler
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StandardScalerArtifact {
    mean: Vec<f64>,
    scale: Vec<f64>,
    #[serde(default = "default_true")]
    with_mean: bool,
    #[serde(default = "default_true")]
    with_std: bool,
}

/// Per-feature standardization: `(v - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "StandardScalerArtifact")]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
    with_mean: bool,
    with_std: bool,
}

impl TryFrom<StandardScalerArtifact> for StandardScaler {
    type Error = InvalidArtifact;

    fn try_from(raw: StandardScalerArtifact) -> Result<Self, Self::Error> {
        if raw.mean.is_empty() {
            return Err(invalid("scaler mean is empty"));
        }
        if raw.mean.len() != raw.scale.len() {
            return Err(invalid(format!(
                "scaler mean has {} entries but scale has {}",
                raw.mean.len(),
                raw.scale.len()
            )));
        }
        if !all_finite(&raw.mean) || !all_finite(&raw.scale) {
            return Err(invalid("scaler parameters must be finite"));
        }

        // A constant feature has scale 0; leave it unscaled.
        let scale = raw
            .scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();

        Ok(Self {
            mean: raw.mean,
            scale,
            with_mean: raw.with_mean,
            with_std: raw.with_std,
        })
    }
}

impl Stage for StandardScaler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Scaler
    }

    fn label(&self) -> String {
        "scaler".to_string()
    }

    fn input_dim(&self) -> usize {
        self.mean.len()
    }

    fn output_dim(&self) -> usize {
        self.mean.len()
    }

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(input.len(), self.mean.len(), "scaler input width");
        input
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&v, (&mean, &scale))| {
                let centered = if self.with_mean { v - mean } else { v };
                if self.with_std {
                    centered / scale
                } else {
                    centered
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PCA
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PcaArtifact {
    mean: Vec<f64>,
    components: Vec<Vec<f64>>,
    #[serde(default)]
    explained_variance: Option<Vec<f64>>,
    #[serde(default)]
    whiten: bool,
}

/// Linear projection onto principal components.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "PcaArtifact")]
pub struct Pca {
    mean: Vec<f64>,
    components: Vec<Vec<f64>>,
    /// Per-component divisor: `sqrt(explained_variance)` when whitening.
    whiten_scale: Option<Vec<f64>>,
}

impl TryFrom<PcaArtifact> for Pca {
    type Error = InvalidArtifact;

    fn try_from(raw: PcaArtifact) -> Result<Self, Self::Error> {
        if raw.mean.is_empty() {
            return Err(invalid("pca mean is empty"));
        }
        if raw.components.is_empty() {
            return Err(invalid("pca has no components"));
        }
        for (i, row) in raw.components.iter().enumerate() {
            if row.len() != raw.mean.len() {
                return Err(invalid(format!(
                    "pca component {i} has {} entries but mean has {}",
                    row.len(),
                    raw.mean.len()
                )));
            }
            if !all_finite(row) {
                return Err(invalid(format!("pca component {i} is not finite")));
            }
        }
        if !all_finite(&raw.mean) {
            return Err(invalid("pca mean must be finite"));
        }

        let whiten_scale = if raw.whiten {
            let variance = raw
                .explained_variance
                .ok_or_else(|| invalid("whiten requires explained_variance"))?;
            if variance.len() != raw.components.len() {
                return Err(invalid(format!(
                    "explained_variance has {} entries for {} components",
                    variance.len(),
                    raw.components.len()
                )));
            }
            if variance.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err(invalid("explained_variance must be positive"));
            }
            Some(variance.into_iter().map(f64::sqrt).collect())
        } else {
            None
        };

        Ok(Self {
            mean: raw.mean,
            components: raw.components,
            whiten_scale,
        })
    }
}

impl Stage for Pca {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Pca
    }

    fn label(&self) -> String {
        if self.whiten_scale.is_some() {
            format!("pca(n={},whiten)", self.components.len())
        } else {
            format!("pca(n={})", self.components.len())
        }
    }

    fn input_dim(&self) -> usize {
        self.mean.len()
    }

    fn output_dim(&self) -> usize {
        self.components.len()
    }

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(input.len(), self.mean.len(), "pca input width");
        self.components
            .iter()
            .enumerate()
            .map(|(j, component)| {
                let projected: f64 = component
                    .iter()
                    .zip(input.iter().zip(&self.mean))
                    .map(|(c, (v, m))| c * (v - m))
                    .sum();
                self.whiten_scale
                    .as_ref()
                    .map_or(projected, |scale| projected / scale[j])
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// KNN regressor
// ---------------------------------------------------------------------------

/// How neighbor targets are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnnWeights {
    /// Plain mean.
    #[default]
    Uniform,
    /// Inverse-distance weighted mean.
    Distance,
}

impl fmt::Display for KnnWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uniform => "uniform",
            Self::Distance => "distance",
        })
    }
}

#[derive(Debug, Deserialize)]
struct KnnArtifact {
    n_neighbors: usize,
    #[serde(default)]
    weights: KnnWeights,
    #[serde(default = "default_minkowski_p")]
    p: f64,
    fit_x: Vec<Vec<f64>>,
    fit_y: Vec<f64>,
}

const fn default_minkowski_p() -> f64 {
    2.0
}

/// Brute-force k-nearest-neighbor regressor over stored training points.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "KnnArtifact")]
pub struct KnnRegressor {
    n_neighbors: usize,
    weights: KnnWeights,
    p: f64,
    fit_x: Vec<Vec<f64>>,
    fit_y: Vec<f64>,
}

impl TryFrom<KnnArtifact> for KnnRegressor {
    type Error = InvalidArtifact;

    fn try_from(raw: KnnArtifact) -> Result<Self, Self::Error> {
        let Some(width) = raw.fit_x.first().map(Vec::len) else {
            return Err(invalid("knn has no training points"));
        };
        if width == 0 {
            return Err(invalid("knn training points have no features"));
        }
        if let Some(i) = raw.fit_x.iter().position(|row| row.len() != width) {
            return Err(invalid(format!(
                "knn training point {i} has {} features, expected {width}",
                raw.fit_x[i].len()
            )));
        }
        if raw.fit_y.len() != raw.fit_x.len() {
            return Err(invalid(format!(
                "knn has {} training points but {} targets",
                raw.fit_x.len(),
                raw.fit_y.len()
            )));
        }
        if raw.n_neighbors == 0 || raw.n_neighbors > raw.fit_x.len() {
            return Err(invalid(format!(
                "n_neighbors must be between 1 and {}, got {}",
                raw.fit_x.len(),
                raw.n_neighbors
            )));
        }
        if !raw.p.is_finite() || raw.p < 1.0 {
            return Err(invalid(format!("minkowski p must be >= 1, got {}", raw.p)));
        }
        if !all_finite(&raw.fit_y) || !raw.fit_x.iter().all(|row| all_finite(row)) {
            return Err(invalid("knn training data must be finite"));
        }

        Ok(Self {
            n_neighbors: raw.n_neighbors,
            weights: raw.weights,
            p: raw.p,
            fit_x: raw.fit_x,
            fit_y: raw.fit_y,
        })
    }
}

impl KnnRegressor {
    #[allow(clippy::float_cmp)]
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let diffs = a.iter().zip(b).map(|(x, y)| (x - y).abs());
        if self.p == 1.0 {
            diffs.sum()
        } else if self.p == 2.0 {
            diffs.map(|d| d * d).sum::<f64>().sqrt()
        } else {
            diffs.map(|d| d.powf(self.p)).sum::<f64>().powf(self.p.recip())
        }
    }
}

impl Stage for KnnRegressor {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Knn
    }

    fn label(&self) -> String {
        format!("knn(k={},{})", self.n_neighbors, self.weights)
    }

    fn input_dim(&self) -> usize {
        self.fit_x[0].len()
    }

    fn output_dim(&self) -> usize {
        1
    }

    #[allow(clippy::cast_precision_loss)]
    fn apply(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(input.len(), self.input_dim(), "knn input width");

        let mut distances: Vec<(f64, usize)> = self
            .fit_x
            .iter()
            .enumerate()
            .map(|(i, point)| (self.distance(input, point), i))
            .collect();
        // Stable sort: equal distances keep training order.
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        let nearest = &distances[..self.n_neighbors];

        let value = match self.weights {
            KnnWeights::Uniform => {
                nearest.iter().map(|&(_, i)| self.fit_y[i]).sum::<f64>() / nearest.len() as f64
            }
            KnnWeights::Distance => {
                let exact: Vec<f64> = nearest
                    .iter()
                    .filter(|(d, _)| *d == 0.0)
                    .map(|&(_, i)| self.fit_y[i])
                    .collect();
                if exact.is_empty() {
                    let (weighted, total) = nearest.iter().fold((0.0, 0.0), |(sum, w), &(d, i)| {
                        let weight = d.recip();
                        (weight.mul_add(self.fit_y[i], sum), w + weight)
                    });
                    weighted / total
                } else {
                    exact.iter().sum::<f64>() / exact.len() as f64
                }
            }
        };

        vec![value]
    }
}
