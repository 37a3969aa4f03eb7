//! Gradient-boosted trees with a softmax objective
//!
//! Every round fits one Newton regression tree per class on the weighted
//! softmax gradients, then shrinks its leaves by the learning rate.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::classifier::{argmax, check_fit_inputs, Classifier, Model, ModelKind};
use super::tree::{Newton, Tree, TreeBuilder};
use crate::error::{CanvasError, CanvasResult};

const MIN_HESSIAN: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostParams {
    /// Boosting rounds
    pub n_rounds: usize,
    /// Shrinkage applied to every leaf value
    pub learning_rate: f32,
    pub max_depth: usize,
    /// Minimum hessian mass in a child
    pub min_child_weight: f64,
    /// L2 penalty on leaf values
    pub lambda: f64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_child_weight: 1.0,
            lambda: 1.0,
        }
    }
}

impl BoostParams {
    pub fn validate(&self) -> CanvasResult<()> {
        if self.n_rounds == 0 {
            return Err(CanvasError::invalid_parameter(
                "classifier.boost.n_rounds",
                self.n_rounds,
                "> 0",
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(CanvasError::invalid_parameter(
                "classifier.boost.learning_rate",
                self.learning_rate,
                "in (0, 1]",
            ));
        }
        if self.max_depth == 0 {
            return Err(CanvasError::invalid_parameter(
                "classifier.boost.max_depth",
                self.max_depth,
                "> 0",
            ));
        }
        if self.min_child_weight < 0.0 || self.lambda < 0.0 {
            return Err(CanvasError::invalid_parameter(
                "classifier.boost.min_child_weight/lambda",
                format!("{}/{}", self.min_child_weight, self.lambda),
                ">= 0",
            ));
        }
        Ok(())
    }
}

pub struct GradientBoosting {
    params: BoostParams,
}

impl GradientBoosting {
    pub fn new(params: BoostParams) -> Self {
        Self { params }
    }
}

/// Row-wise softmax of raw class scores.
fn softmax(scores: &Array2<f32>) -> Array2<f64> {
    let mut probs = scores.mapv(f64::from);
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probs
}

impl Classifier for GradientBoosting {
    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosting
    }

    fn fit(
        &self,
        features: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, usize>,
        sample_weights: ArrayView1<'_, f32>,
    ) -> CanvasResult<Box<dyn Model>> {
        self.params.validate()?;
        let n_classes = check_fit_inputs(&features, &labels, &sample_weights)?;
        let n_rows = features.nrows();
        let n_features = features.ncols();

        if n_classes < 2 {
            return Ok(Box::new(BoostedModel {
                rounds: Vec::new(),
                learning_rate: self.params.learning_rate,
                n_classes: n_classes.max(1),
                n_features,
            }));
        }

        let mut scores = Array2::<f32>::zeros((n_rows, n_classes));
        let mut rounds = Vec::with_capacity(self.params.n_rounds);

        for _ in 0..self.params.n_rounds {
            let probs = softmax(&scores);

            let trees: Vec<Tree<f32>> = (0..n_classes)
                .into_par_iter()
                .map(|class| {
                    let mut gradients = Vec::with_capacity(n_rows);
                    let mut hessians = Vec::with_capacity(n_rows);
                    for i in 0..n_rows {
                        let w = f64::from(sample_weights[i]);
                        let p = probs[[i, class]];
                        let target = if labels[i] == class { 1.0 } else { 0.0 };
                        gradients.push(w * (p - target));
                        hessians.push((w * p * (1.0 - p)).max(MIN_HESSIAN));
                    }

                    let criterion = Newton {
                        gradients: &gradients,
                        hessians: &hessians,
                        lambda: self.params.lambda,
                    };
                    let builder = TreeBuilder {
                        features,
                        criterion: &criterion,
                        max_depth: self.params.max_depth,
                        min_samples_split: 2,
                        min_child_weight: self.params.min_child_weight,
                        max_features: n_features,
                    };
                    // all features are scanned, the generator is never drawn from
                    builder.build((0..n_rows).collect(), &mut StdRng::seed_from_u64(0))
                })
                .collect();

            for (class, tree) in trees.iter().enumerate() {
                for (i, row) in features.outer_iter().enumerate() {
                    scores[[i, class]] += self.params.learning_rate * tree.leaf(row);
                }
            }
            rounds.push(trees);
        }

        tracing::debug!(
            rounds = rounds.len(),
            rows = n_rows,
            classes = n_classes,
            "gradient boosting fit"
        );

        Ok(Box::new(BoostedModel {
            rounds,
            learning_rate: self.params.learning_rate,
            n_classes,
            n_features,
        }))
    }
}

struct BoostedModel {
    /// One tree per class per round
    rounds: Vec<Vec<Tree<f32>>>,
    learning_rate: f32,
    n_classes: usize,
    n_features: usize,
}

impl BoostedModel {
    fn predict_row(&self, row: ArrayView1<'_, f32>) -> usize {
        let mut scores = vec![0.0f32; self.n_classes];
        for trees in &self.rounds {
            for (score, tree) in scores.iter_mut().zip(trees) {
                *score += self.learning_rate * tree.leaf(row);
            }
        }
        argmax(&scores)
    }
}

impl Model for BoostedModel {
    fn predict(&self, features: ArrayView2<'_, f32>) -> Array1<usize> {
        let predicted: Vec<usize> = (0..features.nrows())
            .into_par_iter()
            .map(|i| self.predict_row(features.row(i)))
            .collect();
        Array1::from_vec(predicted)
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}
