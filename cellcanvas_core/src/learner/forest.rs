//! Random forest classifier
//!
//! Each tree is grown on a bootstrap draw of `max_samples` of the rows, with
//! `sqrt(F)` candidate features per split and class-weighted Gini impurity.
//! Prediction averages the per-tree leaf distributions.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::classifier::{argmax, check_fit_inputs, Classifier, Model, ModelKind};
use super::tree::{Gini, Tree, TreeBuilder};
use crate::error::{CanvasError, CanvasResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Fraction of rows drawn (with replacement) per tree
    pub max_samples: f64,
    pub min_samples_split: usize,
    /// Features tried per split; `None` means `sqrt(F)`
    pub max_features: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            max_depth: 10,
            max_samples: 0.05,
            min_samples_split: 2,
            max_features: None,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> CanvasResult<()> {
        if self.n_estimators == 0 {
            return Err(CanvasError::invalid_parameter(
                "classifier.forest.n_estimators",
                self.n_estimators,
                "> 0",
            ));
        }
        if self.max_depth == 0 {
            return Err(CanvasError::invalid_parameter(
                "classifier.forest.max_depth",
                self.max_depth,
                "> 0",
            ));
        }
        if !(self.max_samples > 0.0 && self.max_samples <= 1.0) {
            return Err(CanvasError::invalid_parameter(
                "classifier.forest.max_samples",
                self.max_samples,
                "in (0, 1]",
            ));
        }
        if self.min_samples_split < 2 {
            return Err(CanvasError::invalid_parameter(
                "classifier.forest.min_samples_split",
                self.min_samples_split,
                ">= 2",
            ));
        }
        if self.max_features == Some(0) {
            return Err(CanvasError::invalid_parameter(
                "classifier.forest.max_features",
                0,
                "> 0 when set",
            ));
        }
        Ok(())
    }

    fn features_per_split(&self, n_features: usize) -> usize {
        let default = ((n_features as f64).sqrt() as usize).max(1);
        self.max_features.unwrap_or(default).min(n_features).max(1)
    }

    fn bootstrap_size(&self, n_rows: usize) -> usize {
        ((self.max_samples * n_rows as f64).round() as usize).max(1)
    }
}

pub struct RandomForest {
    params: ForestParams,
    seed: u64,
}

impl RandomForest {
    pub fn new(params: ForestParams, seed: u64) -> Self {
        Self { params, seed }
    }
}

impl Classifier for RandomForest {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
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
        let labels = labels.to_vec();
        let weights = sample_weights.to_vec();
        let criterion = Gini {
            labels: &labels,
            weights: &weights,
            n_classes,
        };
        let builder = TreeBuilder {
            features,
            criterion: &criterion,
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_child_weight: 0.0,
            max_features: self.params.features_per_split(n_features),
        };
        let draws = self.params.bootstrap_size(n_rows);

        let trees: Vec<Tree<Vec<f32>>> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(t as u64));
                let indices = (0..draws).map(|_| rng.gen_range(0..n_rows)).collect();
                builder.build(indices, &mut rng)
            })
            .collect();

        tracing::debug!(
            trees = trees.len(),
            rows = n_rows,
            bootstrap = draws,
            classes = n_classes,
            "random forest fit"
        );

        Ok(Box::new(ForestModel {
            trees,
            n_classes,
            n_features,
        }))
    }
}

struct ForestModel {
    trees: Vec<Tree<Vec<f32>>>,
    n_classes: usize,
    n_features: usize,
}

impl ForestModel {
    fn predict_row(&self, row: ArrayView1<'_, f32>) -> usize {
        let mut votes = vec![0.0f32; self.n_classes];
        for tree in &self.trees {
            for (vote, p) in votes.iter_mut().zip(tree.leaf(row)) {
                *vote += p;
            }
        }
        argmax(&votes)
    }
}

impl Model for ForestModel {
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

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blobs() -> (Array2<f32>, Array1<usize>) {
        // three well separated clusters along feature 0, feature 1 is constant
        let features = Array2::from_shape_fn((60, 2), |(i, f)| {
            if f == 0 {
                (i / 20) as f32 * 10.0 + (i % 5) as f32 * 0.1
            } else {
                1.0
            }
        });
        let labels = Array1::from_shape_fn(60, |i| i / 20);
        (features, labels)
    }

    fn full_bootstrap() -> ForestParams {
        ForestParams {
            n_estimators: 10,
            max_samples: 1.0,
            ..ForestParams::default()
        }
    }

    #[test]
    fn separates_clusters() {
        let (x, y) = blobs();
        let weights = Array1::from_elem(60, 1.0f32);
        let model = RandomForest::new(full_bootstrap(), 7)
            .fit(x.view(), y.view(), weights.view())
            .unwrap();

        assert_eq!(model.n_classes(), 3);
        assert_eq!(model.n_features(), 2);
        assert_eq!(model.predict(x.view()), y);
    }

    #[test]
    fn same_seed_same_model() {
        let (x, y) = blobs();
        let weights = Array1::from_elem(60, 1.0f32);
        let params = ForestParams {
            max_samples: 0.2,
            ..full_bootstrap()
        };
        let a = RandomForest::new(params.clone(), 1)
            .fit(x.view(), y.view(), weights.view())
            .unwrap();
        let b = RandomForest::new(params, 1)
            .fit(x.view(), y.view(), weights.view())
            .unwrap();
        assert_eq!(a.predict(x.view()), b.predict(x.view()));
    }

    #[test]
    fn single_class_predicts_that_class() {
        let x = Array2::from_shape_fn((4, 1), |(i, _)| i as f32);
        let y = Array1::zeros(4);
        let weights = Array1::from_elem(4, 1.0f32);
        let model = RandomForest::new(full_bootstrap(), 0)
            .fit(x.view(), y.view(), weights.view())
            .unwrap();
        assert!(model.predict(x.view()).iter().all(|&c| c == 0));
    }

    #[test]
    fn bootstrap_never_empty() {
        let params = ForestParams::default();
        assert_eq!(params.bootstrap_size(2), 1);
        assert_eq!(params.bootstrap_size(1000), 50);
        assert_eq!(params.features_per_split(10), 3);
        assert_eq!(params.features_per_split(1), 1);
    }

    #[test]
    fn rejects_bad_sample_fraction() {
        let params = ForestParams {
            max_samples: 1.5,
            ..ForestParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(CanvasError::InvalidParameter { .. })
        ));
    }
}
