//! Classifier capability
//!
//! A [`Classifier`] turns a weighted, 0-based labeled matrix into an opaque
//! [`Model`]. Models are immutable once fit; a new fit always produces a new
//! model.

use std::fmt::{self, Display};
use std::str::FromStr;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::boost::{BoostParams, GradientBoosting};
use super::forest::{ForestParams, RandomForest};
use crate::error::{CanvasError, CanvasResult};

/// Trained model: feature matrix in, 0-based class indices out.
pub trait Model: Send + Sync {
    fn predict(&self, features: ArrayView2<'_, f32>) -> Array1<usize>;

    fn n_classes(&self) -> usize;

    fn n_features(&self) -> usize;
}

/// Fits a [`Model`] from `features` (N × F), 0-based `labels` (N) and
/// per-sample weights (N).
pub trait Classifier: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn fit(
        &self,
        features: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, usize>,
        sample_weights: ArrayView1<'_, f32>,
    ) -> CanvasResult<Box<dyn Model>>;
}

/// Selectable classifier families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    RandomForest,
    GradientBoosting,
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::RandomForest => write!(f, "random_forest"),
            ModelKind::GradientBoosting => write!(f, "gradient_boosting"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = CanvasError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "random_forest" | "random forest" | "rf" => Ok(ModelKind::RandomForest),
            "gradient_boosting" | "gradient boosting" | "xgboost" | "gbt" => {
                Ok(ModelKind::GradientBoosting)
            }
            other => Err(CanvasError::invalid_parameter(
                "classifier.kind",
                other,
                "one of random_forest, gradient_boosting",
            )),
        }
    }
}

/// Configuration for the classifier families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Family used for new fits
    pub kind: ModelKind,
    pub forest: ForestParams,
    pub boost: BoostParams,
    /// Random seed for bootstrap and feature sampling
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::default(),
            forest: ForestParams::default(),
            boost: BoostParams::default(),
            seed: 42,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> CanvasResult<()> {
        self.forest.validate()?;
        self.boost.validate()
    }
}

/// Instantiate the classifier family named by `kind`.
pub fn build_classifier(kind: ModelKind, config: &ClassifierConfig) -> Box<dyn Classifier> {
    match kind {
        ModelKind::RandomForest => Box::new(RandomForest::new(config.forest.clone(), config.seed)),
        ModelKind::GradientBoosting => Box::new(GradientBoosting::new(config.boost.clone())),
    }
}

/// Shared argument checks for [`Classifier::fit`] implementations.
pub(crate) fn check_fit_inputs(
    features: &ArrayView2<'_, f32>,
    labels: &ArrayView1<'_, usize>,
    sample_weights: &ArrayView1<'_, f32>,
) -> CanvasResult<usize> {
    let n = features.nrows();
    if n == 0 {
        return Err(CanvasError::InsufficientLabels);
    }
    if labels.len() != n {
        return Err(CanvasError::dimension_mismatch(n, labels.len(), "training labels"));
    }
    if sample_weights.len() != n {
        return Err(CanvasError::dimension_mismatch(
            n,
            sample_weights.len(),
            "sample weights",
        ));
    }
    Ok(labels.iter().copied().max().map_or(0, |max| max + 1))
}

/// Index of the largest value; ties resolve to the lowest index.
pub(crate) fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (idx, &value) in values.iter().enumerate() {
        if value > values[best] {
            best = idx;
        }
    }
    best
}
