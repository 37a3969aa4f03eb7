//! Training step: label filtering, class weighting and the fitted-model wrapper
//!
//! Rows with label 0 are dropped. The remaining labels are mapped onto a
//! dense 0-based class index in ascending label order, and predictions are
//! mapped back through the same class table. For the usual contiguous label
//! set `1..=K` this is exactly "subtract one to train, add one to predict".

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::Serialize;

use super::classifier::{Classifier, Model, ModelKind};
use crate::error::{CanvasError, CanvasResult};
use crate::features::SampleBatch;
use crate::volume::{FeatureSource, Label};

/// Weighted, label-0-free training matrix.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: Array2<f32>,
    /// Dense class index per row
    pub targets: Array1<usize>,
    /// Class index -> label
    pub classes: Vec<Label>,
    /// Balanced weight per class index
    pub class_weights: Vec<f32>,
    pub sample_weights: Array1<f32>,
}

impl TrainingSet {
    pub fn n_samples(&self) -> usize {
        self.targets.len()
    }
}

/// `n_samples / (n_classes * count(c))` per class; classes without samples
/// get weight 0.
pub fn balanced_class_weights(targets: &[usize], n_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; n_classes];
    for &t in targets {
        counts[t] += 1;
    }
    let n = targets.len() as f32;
    counts
        .iter()
        .map(|&count| {
            if count == 0 {
                0.0
            } else {
                n / (n_classes as f32 * count as f32)
            }
        })
        .collect()
}

/// Keep labeled rows only and attach balanced class weights.
pub fn prepare_training_set(
    features: ArrayView2<'_, f32>,
    labels: ArrayView1<'_, Label>,
) -> CanvasResult<TrainingSet> {
    if features.nrows() != labels.len() {
        return Err(CanvasError::dimension_mismatch(
            features.nrows(),
            labels.len(),
            "training labels",
        ));
    }

    let rows: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &label)| label > 0)
        .map(|(row, _)| row)
        .collect();
    if rows.is_empty() {
        return Err(CanvasError::InsufficientLabels);
    }

    let index: BTreeMap<Label, usize> = rows
        .iter()
        .map(|&row| (labels[row], 0))
        .collect::<BTreeMap<_, _>>()
        .into_keys()
        .enumerate()
        .map(|(class, label)| (label, class))
        .collect();
    let classes: Vec<Label> = index.keys().copied().collect();

    let targets: Vec<usize> = rows.iter().map(|&row| index[&labels[row]]).collect();
    let class_weights = balanced_class_weights(&targets, classes.len());
    let sample_weights = targets.iter().map(|&t| class_weights[t]).collect();

    Ok(TrainingSet {
        features: features.select(Axis(0), &rows),
        targets: Array1::from_vec(targets),
        classes,
        class_weights,
        sample_weights,
    })
}

/// Summary of a published model, safe to clone into events and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub kind: ModelKind,
    pub classes: Vec<Label>,
    pub sources: Vec<String>,
    pub n_features: usize,
    pub n_training_samples: usize,
}

/// A fitted model together with everything needed to apply it.
pub struct TrainedModel {
    pub kind: ModelKind,
    /// Feature sources, in the column order the model was fit on
    pub sources: Vec<FeatureSource>,
    pub classes: Vec<Label>,
    pub class_weights: Vec<f32>,
    pub n_training_samples: usize,
    model: Box<dyn Model>,
}

impl fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainedModel")
            .field("kind", &self.kind)
            .field("classes", &self.classes)
            .field("n_features", &self.model.n_features())
            .field("n_training_samples", &self.n_training_samples)
            .finish()
    }
}

impl TrainedModel {
    pub fn n_features(&self) -> usize {
        self.model.n_features()
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            kind: self.kind,
            classes: self.classes.clone(),
            sources: self.sources.iter().map(|s| s.name.clone()).collect(),
            n_features: self.n_features(),
            n_training_samples: self.n_training_samples,
        }
    }

    /// Predict one label (>= 1) per row.
    pub fn predict_labels(&self, features: ArrayView2<'_, f32>) -> CanvasResult<Array1<Label>> {
        if features.ncols() != self.n_features() {
            return Err(CanvasError::dimension_mismatch(
                self.n_features(),
                features.ncols(),
                "prediction features",
            ));
        }
        let classes = &self.classes;
        Ok(self.model.predict(features).mapv(|class| {
            classes
                .get(class)
                .copied()
                .unwrap_or(class as Label + 1)
        }))
    }
}

/// Fit `classifier` on the labeled rows of `batch`.
pub fn fit_model(classifier: &dyn Classifier, batch: &SampleBatch) -> CanvasResult<TrainedModel> {
    let set = prepare_training_set(batch.features.view(), batch.labels.view())?;
    let model = classifier.fit(
        set.features.view(),
        set.targets.view(),
        set.sample_weights.view(),
    )?;

    tracing::info!(
        kind = %classifier.kind(),
        samples = set.n_samples(),
        classes = ?set.classes,
        "model trained"
    );

    Ok(TrainedModel {
        kind: classifier.kind(),
        sources: batch.sources.clone(),
        n_training_samples: set.n_samples(),
        classes: set.classes,
        class_weights: set.class_weights,
        model,
    })
}
